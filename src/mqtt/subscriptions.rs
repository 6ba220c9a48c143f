//! Subscription accounting for the fixed topic set.
//!
//! Every subscribe acknowledgement raises the count, every unsubscribe acknowledgement
//! lowers it. After an exit request the disconnect is held back until the last
//! unsubscribe has been acknowledged, so the broker never keeps stale subscriptions.

use rumqttc::QoS;
use tracing::{debug, error, info, warn};

use super::error::{RequestError, SessionError};
use super::session::Effect;
use super::topics::{Topic, TopicNamespace};

pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    count: usize,
    stop_requested: bool,
    disconnect_issued: bool,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn disconnect_issued(&self) -> bool {
        self.disconnect_issued
    }

    /// One subscribe request per topic of the fixed set.
    pub fn subscribe_all(&self, namespace: &TopicNamespace) -> Vec<Effect> {
        debug!("Subscribing to {} topics", Topic::SUBSCRIBED.len());
        Topic::SUBSCRIBED
            .iter()
            .map(|topic| Effect::Subscribe {
                topic: namespace.resolve_topic(*topic).into_owned(),
                qos: SUBSCRIBE_QOS,
            })
            .collect()
    }

    /// One unsubscribe request per topic of the fixed set.
    pub fn unsubscribe_all(&self, namespace: &TopicNamespace) -> Vec<Effect> {
        debug!("Unsubscribing from {} topics", Topic::SUBSCRIBED.len());
        Topic::SUBSCRIBED
            .iter()
            .map(|topic| Effect::Unsubscribe {
                topic: namespace.resolve_topic(*topic).into_owned(),
            })
            .collect()
    }

    /// Marks the session for shutdown and starts the unsubscribe drain.
    ///
    /// A repeated request while the drain runs yields no requests.
    pub fn request_stop(&mut self, namespace: &TopicNamespace) -> Vec<Effect> {
        if self.stop_requested {
            warn!("Exit already in progress, ignoring repeated request");
            return Vec::new();
        }
        info!(
            "Exit requested, draining {} subscriptions before disconnect",
            self.count
        );
        self.stop_requested = true;
        self.unsubscribe_all(namespace)
    }

    pub fn on_subscribed(&mut self, outcome: Result<(), RequestError>) -> Result<(), SessionError> {
        if let Err(e) = outcome {
            error!("subscribe request failed: {}", e);
            return Err(SessionError::SubscribeFailed(e));
        }
        self.count += 1;
        debug!("Subscription acknowledged, {} active", self.count);
        Ok(())
    }

    /// Returns the disconnect effect once the drain is complete.
    pub fn on_unsubscribed(
        &mut self,
        outcome: Result<(), RequestError>,
    ) -> Result<Option<Effect>, SessionError> {
        if let Err(e) = outcome {
            error!("unsubscribe request failed: {}", e);
            return Err(SessionError::UnsubscribeFailed(e));
        }
        self.count = match self.count.checked_sub(1) {
            Some(count) => count,
            None => {
                error!("Unsubscribe acknowledged with no active subscription");
                return Err(SessionError::SubscriptionUnderflow);
            }
        };
        debug!("Unsubscribe acknowledged, {} active", self.count);

        if self.count == 0 && self.stop_requested && !self.disconnect_issued {
            info!("All subscriptions released, disconnecting");
            self.disconnect_issued = true;
            return Ok(Some(Effect::Disconnect));
        }
        Ok(None)
    }
}
