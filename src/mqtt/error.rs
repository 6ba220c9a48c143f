//! Error types of the MQTT session

use thiserror::Error;

/// Failure reported for a single broker request (subscribe, unsubscribe, publish).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The broker answered with a failure code
    #[error("broker rejected the request")]
    Rejected,

    /// The request never left the client
    #[error("request could not be queued: {0}")]
    Client(String),
}

/// Conditions that end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("dns request failed for {host}: {reason}")]
    DnsFailed { host: String, reason: String },

    #[error("Failed to connect to mqtt server")]
    ConnectFailed,

    #[error("subscribe request failed: {0}")]
    SubscribeFailed(RequestError),

    #[error("unsubscribe request failed: {0}")]
    UnsubscribeFailed(RequestError),

    #[error("subscription count went below zero")]
    SubscriptionUnderflow,
}
