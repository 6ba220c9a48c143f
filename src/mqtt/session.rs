//! Session state and the connection lifecycle.
//!
//! The session is a pure state machine: the driver feeds it one [`SessionEvent`] at a
//! time and executes the [`Effect`]s it returns. Nothing in here touches the network,
//! which keeps every transition testable without a broker.
//!
//! # Lifecycle
//!
//! ```text
//! Unresolved ──► Resolving ──► Connecting ──► Connected ──► Disconnected
//!                    │              │
//!                    └──► Failed ◄──┘
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rumqttc::QoS;
use tracing::{debug, error, info, warn};

use super::error::{RequestError, SessionError};
use super::level::LevelFrame;
use super::router::{Command, InboundAssembler, MessageRouter};
use super::subscriptions::SubscriptionManager;
use super::topics::{Topic, TopicNamespace, LED_STATE, UPTIME};
use super::transport::TlsMode;
use crate::device::StatusLights;

pub const PUBLISH_QOS: QoS = QoS::AtLeastOnce;
pub const PUBLISH_RETAIN: bool = false;
pub const WILL_QOS: QoS = QoS::AtLeastOnce;
pub const WILL_OFFLINE: &str = "0";
pub const WILL_ONLINE: &str = "1";

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Unresolved,
    Resolving,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Connection status reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Accepted,
    /// CONNACK with a non-zero return code
    Refused(u8),
    Timeout,
    Disconnected,
}

/// Everything the transport can tell the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Resolved(Result<SocketAddr, String>),
    ConnectStatus(ConnectionStatus),
    SubscribeDone(Result<(), RequestError>),
    UnsubscribeDone(Result<(), RequestError>),
    PublishDone(Result<(), RequestError>),
    InboundTopic(String),
    InboundData(Vec<u8>),
    /// Operator asked the device to stop
    ShutdownRequested,
}

/// Work the session asks the driver to carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Resolve { host: String, port: u16 },
    Connect(SocketAddr),
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Disconnect,
    SetLed(bool),
    SetStatus(StatusLights),
    Render(LevelFrame),
}

/// Connection parameters, fixed once the session is built.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub will_topic: String,
    pub will_message: String,
    pub will_qos: QoS,
    pub will_retain: bool,
    pub tls: TlsMode,
}

impl ClientInfo {
    /// Builds the connection parameters; the will topic goes through `namespace`.
    pub fn new(
        namespace: &TopicNamespace,
        credentials: Option<(String, String)>,
        keep_alive: Duration,
        tls: TlsMode,
    ) -> Self {
        Self {
            client_id: namespace.client_id().to_string(),
            credentials,
            keep_alive,
            will_topic: namespace.resolve_topic(Topic::Online).into_owned(),
            will_message: WILL_OFFLINE.to_string(),
            will_qos: WILL_QOS,
            will_retain: true,
            tls,
        }
    }
}

/// Broker endpoint and buffer limits of a session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub max_topic_len: usize,
    pub max_payload_len: usize,
}

pub struct Session {
    info: ClientInfo,
    settings: SessionSettings,
    namespace: TopicNamespace,
    state: ConnectionState,
    broker_address: Option<SocketAddr>,
    connect_done: bool,
    subscriptions: SubscriptionManager,
    inbound: InboundAssembler,
    router: MessageRouter,
    booted_at: Instant,
}

impl Session {
    pub fn new(info: ClientInfo, namespace: TopicNamespace, settings: SessionSettings) -> Self {
        let inbound = InboundAssembler::new(settings.max_topic_len, settings.max_payload_len);
        Self {
            info,
            settings,
            namespace,
            state: ConnectionState::default(),
            broker_address: None,
            connect_done: false,
            subscriptions: SubscriptionManager::new(),
            inbound,
            router: MessageRouter::new(),
            booted_at: Instant::now(),
        }
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.info
    }

    pub fn namespace(&self) -> &TopicNamespace {
        &self.namespace
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn broker_address(&self) -> Option<SocketAddr> {
        self.broker_address
    }

    pub fn connect_done(&self) -> bool {
        self.connect_done
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn uptime(&self) -> Duration {
        self.booted_at.elapsed()
    }

    /// Loop condition of the driver: not yet connected once, or still connected.
    pub fn should_keep_running(&self) -> bool {
        match self.state {
            ConnectionState::Failed => false,
            _ => !self.connect_done || self.state == ConnectionState::Connected,
        }
    }

    /// Kicks off the broker address resolution.
    pub fn begin(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Unresolved {
            warn!("Session already started ({:?})", self.state);
            return Vec::new();
        }
        self.state = ConnectionState::Resolving;
        debug!("Resolving broker {}", self.settings.broker_host);
        vec![Effect::Resolve {
            host: self.settings.broker_host.clone(),
            port: self.settings.broker_port,
        }]
    }

    /// Applies one event. An error means the session cannot continue.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<Effect>, SessionError> {
        match event {
            SessionEvent::Resolved(outcome) => self.on_resolved(outcome),
            SessionEvent::ConnectStatus(status) => self.on_connect_status(status),
            SessionEvent::SubscribeDone(outcome) => {
                self.subscriptions.on_subscribed(outcome)?;
                Ok(Vec::new())
            }
            SessionEvent::UnsubscribeDone(outcome) => {
                Ok(self.subscriptions.on_unsubscribed(outcome)?.into_iter().collect())
            }
            SessionEvent::PublishDone(outcome) => {
                if let Err(e) = outcome {
                    error!("pub_request failed: {}", e);
                }
                Ok(Vec::new())
            }
            SessionEvent::InboundTopic(topic) => {
                self.inbound.begin(topic);
                Ok(Vec::new())
            }
            SessionEvent::InboundData(data) => Ok(self.on_inbound_data(&data)),
            SessionEvent::ShutdownRequested => {
                if self.state != ConnectionState::Connected {
                    warn!("Shutdown requested while {:?}, nothing to drain", self.state);
                    return Ok(Vec::new());
                }
                Ok(self.subscriptions.request_stop(&self.namespace))
            }
        }
    }

    fn on_resolved(
        &mut self,
        outcome: Result<SocketAddr, String>,
    ) -> Result<Vec<Effect>, SessionError> {
        if self.state != ConnectionState::Resolving {
            warn!("Ignoring resolution result while {:?}", self.state);
            return Ok(Vec::new());
        }

        match outcome {
            Ok(address) => {
                info!("DNS found for {}: {}", self.settings.broker_host, address.ip());
                self.broker_address = Some(address);
                self.state = ConnectionState::Connecting;
                Ok(vec![
                    Effect::SetStatus(StatusLights::LINKED),
                    Effect::Connect(address),
                ])
            }
            Err(reason) => {
                error!("dns request failed for {}: {}", self.settings.broker_host, reason);
                self.state = ConnectionState::Failed;
                Err(SessionError::DnsFailed {
                    host: self.settings.broker_host.clone(),
                    reason,
                })
            }
        }
    }

    fn on_connect_status(&mut self, status: ConnectionStatus) -> Result<Vec<Effect>, SessionError> {
        match status {
            ConnectionStatus::Accepted => {
                info!("Connected to mqtt server as {}", self.info.client_id);
                self.connect_done = true;
                self.state = ConnectionState::Connected;

                let mut effects = self.subscriptions.subscribe_all(&self.namespace);
                effects.push(Effect::Publish {
                    topic: self.info.will_topic.clone(),
                    payload: WILL_ONLINE.as_bytes().to_vec(),
                    qos: self.info.will_qos,
                    retain: true,
                });
                Ok(effects)
            }
            ConnectionStatus::Disconnected if !self.connect_done => {
                error!("Failed to connect to mqtt server");
                self.state = ConnectionState::Failed;
                Err(SessionError::ConnectFailed)
            }
            ConnectionStatus::Disconnected => {
                info!("Disconnected from mqtt server");
                self.state = ConnectionState::Disconnected;
                Ok(Vec::new())
            }
            other => {
                warn!("MQTT Connection status: {:?}", other);
                Ok(Vec::new())
            }
        }
    }

    fn on_inbound_data(&mut self, data: &[u8]) -> Vec<Effect> {
        let Some(message) = self.inbound.complete(data) else {
            return Vec::new();
        };
        let Some(logical) = self.namespace.strip(&message.topic) else {
            debug!("Topic {} is outside this device's namespace", message.topic);
            return Vec::new();
        };

        match self.router.route(logical, &message.payload) {
            Some(Command::SetLed(on)) => self.control_led(on),
            Some(Command::Print(text)) => {
                info!("{}", text);
                Vec::new()
            }
            Some(Command::ReportUptime) => {
                let seconds = self.uptime().as_secs().to_string();
                vec![self.publish(UPTIME, seconds)]
            }
            Some(Command::RequestExit) => self.subscriptions.request_stop(&self.namespace),
            Some(Command::ShowLevel(frame)) => {
                debug!("{} at {} ({})", frame.room, frame.text(), frame.bucket);
                vec![Effect::Render(frame)]
            }
            None => Vec::new(),
        }
    }

    fn control_led(&self, on: bool) -> Vec<Effect> {
        let message = if on { "On" } else { "Off" };
        vec![Effect::SetLed(on), self.publish(LED_STATE, message.to_string())]
    }

    fn publish(&self, logical: &str, payload: String) -> Effect {
        Effect::Publish {
            topic: self.namespace.resolve(logical).into_owned(),
            payload: payload.into_bytes(),
            qos: PUBLISH_QOS,
            retain: PUBLISH_RETAIN,
        }
    }
}
