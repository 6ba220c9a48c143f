//! rumqttc glue.
//!
//! Builds the client options from [`ClientInfo`], resolves the broker address and turns
//! every `EventLoop::poll` outcome into [`SessionEvent`]s.

use std::net::SocketAddr;

use color_eyre::{eyre::eyre, Result};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tracing::{debug, info, warn};

use super::error::RequestError;
use super::session::{ClientInfo, ConnectionStatus, SessionEvent};
use crate::config::TlsConfig;

/// How the broker connection is secured.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    Disabled,
    /// TLS with the platform trust store and no client certificate
    Unverified,
    /// Server authenticated against a CA certificate
    ServerAuth { ca: Vec<u8> },
    /// 2-way authentication
    MutualAuth {
        ca: Vec<u8>,
        client_cert: Vec<u8>,
        client_key: Vec<u8>,
    },
}

impl std::fmt::Debug for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsMode::Disabled => write!(f, "Disabled"),
            TlsMode::Unverified => write!(f, "Unverified"),
            TlsMode::ServerAuth { ca } => write!(f, "ServerAuth(ca: {} bytes)", ca.len()),
            TlsMode::MutualAuth { ca, .. } => write!(f, "MutualAuth(ca: {} bytes)", ca.len()),
        }
    }
}

impl TlsMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TlsMode::Disabled)
    }

    /// Reads the certificate files named in the configuration.
    pub async fn load(config: &TlsConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(TlsMode::Disabled);
        }

        let ca = match &config.ca_cert {
            Some(path) => Some(
                tokio::fs::read(path)
                    .await
                    .map_err(|e| eyre!("Failed to read CA certificate {}: {}", path.display(), e))?,
            ),
            None => None,
        };

        match (&config.client_cert, &config.client_key, ca) {
            (None, None, None) => {
                warn!("Warning: tls without a certificate is insecure");
                Ok(TlsMode::Unverified)
            }
            (None, None, Some(ca)) => Ok(TlsMode::ServerAuth { ca }),
            (Some(cert_path), Some(key_path), Some(ca)) => {
                let client_cert = tokio::fs::read(cert_path).await.map_err(|e| {
                    eyre!("Failed to read client certificate {}: {}", cert_path.display(), e)
                })?;
                let client_key = tokio::fs::read(key_path).await.map_err(|e| {
                    eyre!("Failed to read client key {}: {}", key_path.display(), e)
                })?;
                Ok(TlsMode::MutualAuth {
                    ca,
                    client_cert,
                    client_key,
                })
            }
            (Some(_), Some(_), None) => Err(eyre!(
                "A CA certificate is required when a client certificate is configured"
            )),
            _ => Err(eyre!("TLS client certificate and key must be configured together")),
        }
    }

    fn transport(&self) -> Transport {
        match self {
            TlsMode::Disabled => Transport::tcp(),
            TlsMode::Unverified => Transport::tls_with_default_config(),
            TlsMode::ServerAuth { ca } => Transport::tls_with_config(TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth: None,
            }),
            TlsMode::MutualAuth {
                ca,
                client_cert,
                client_key,
            } => Transport::tls_with_config(TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth: Some((client_cert.clone(), client_key.clone())),
            }),
        }
    }
}

/// Client options for `info`, connecting to `host`.
pub fn build_options(info: &ClientInfo, host: &str, port: u16) -> MqttOptions {
    let mut options = MqttOptions::new(info.client_id.clone(), host, port);
    options.set_keep_alive(info.keep_alive).set_clean_session(true);
    if let Some((user, password)) = &info.credentials {
        options.set_credentials(user.clone(), password.clone());
    }
    options.set_last_will(LastWill::new(
        info.will_topic.clone(),
        info.will_message.clone(),
        info.will_qos,
        info.will_retain,
    ));
    options.set_transport(info.tls.transport());
    options
}

/// Translates one poll outcome into session events.
pub fn translate(outcome: Result<Event, ConnectionError>) -> Vec<SessionEvent> {
    match outcome {
        Ok(Event::Incoming(packet)) => translate_packet(packet),
        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
            vec![SessionEvent::ConnectStatus(ConnectionStatus::Disconnected)]
        }
        Ok(Event::Outgoing(_)) => Vec::new(),
        Err(ConnectionError::ConnectionRefused(code)) => vec![
            SessionEvent::ConnectStatus(ConnectionStatus::Refused(refusal_code(code))),
            SessionEvent::ConnectStatus(ConnectionStatus::Disconnected),
        ],
        Err(ConnectionError::NetworkTimeout) | Err(ConnectionError::FlushTimeout) => vec![
            SessionEvent::ConnectStatus(ConnectionStatus::Timeout),
            SessionEvent::ConnectStatus(ConnectionStatus::Disconnected),
        ],
        Err(e) => {
            warn!("MQTT connection error: {}", e);
            vec![SessionEvent::ConnectStatus(ConnectionStatus::Disconnected)]
        }
    }
}

fn translate_packet(packet: Packet) -> Vec<SessionEvent> {
    match packet {
        Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
            vec![SessionEvent::ConnectStatus(ConnectionStatus::Accepted)]
        }
        Packet::ConnAck(ack) => vec![SessionEvent::ConnectStatus(ConnectionStatus::Refused(
            refusal_code(ack.code),
        ))],
        Packet::SubAck(ack) => ack
            .return_codes
            .iter()
            .map(|code| match code {
                SubscribeReasonCode::Success(_) => SessionEvent::SubscribeDone(Ok(())),
                SubscribeReasonCode::Failure => {
                    SessionEvent::SubscribeDone(Err(RequestError::Rejected))
                }
            })
            .collect(),
        Packet::UnsubAck(_) => vec![SessionEvent::UnsubscribeDone(Ok(()))],
        Packet::PubAck(_) => vec![SessionEvent::PublishDone(Ok(()))],
        Packet::Publish(publish) => vec![
            SessionEvent::InboundTopic(publish.topic),
            SessionEvent::InboundData(publish.payload.to_vec()),
        ],
        other => {
            debug!("Unhandled packet: {:?}", other);
            Vec::new()
        }
    }
}

fn refusal_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Owns the rumqttc client and event loop of the session.
pub struct BrokerLink {
    broker_host: String,
    request_capacity: usize,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
}

impl BrokerLink {
    pub fn new(broker_host: impl Into<String>, request_capacity: usize) -> Self {
        Self {
            broker_host: broker_host.into(),
            request_capacity,
            client: None,
            eventloop: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, String> {
        let mut addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| e.to_string())?;
        addresses
            .next()
            .ok_or_else(|| format!("no address found for {}", host))
    }

    /// Creates the client; the CONNECT goes out on the next poll.
    pub fn connect(&mut self, address: SocketAddr, info: &ClientInfo) {
        // TLS needs the hostname for certificate verification
        let host = if info.tls.is_enabled() {
            info!("Using TLS ({:?})", info.tls);
            self.broker_host.clone()
        } else {
            info!("Warning: Not using TLS");
            address.ip().to_string()
        };
        info!("Connecting to mqtt server at {} port {}", host, address.port());

        let options = build_options(info, &host, address.port());
        let (client, eventloop) = AsyncClient::new(options, self.request_capacity);
        self.client = Some(client);
        self.eventloop = Some(eventloop);
    }

    /// Waits for the next network event. Pending forever while no client exists.
    pub async fn poll(&mut self) -> Vec<SessionEvent> {
        match self.eventloop.as_mut() {
            Some(eventloop) => translate(eventloop.poll().await),
            None => std::future::pending().await,
        }
    }

    // Requests never wait for queue space: the event loop draining the queue runs in
    // the caller's task.

    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), RequestError> {
        self.client()?
            .try_subscribe(topic, qos)
            .map_err(|e| RequestError::Client(e.to_string()))
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), RequestError> {
        self.client()?
            .try_unsubscribe(topic)
            .map_err(|e| RequestError::Client(e.to_string()))
    }

    pub fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), RequestError> {
        self.client()?
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| RequestError::Client(e.to_string()))
    }

    pub fn disconnect(&self) -> Result<(), RequestError> {
        self.client()?
            .try_disconnect()
            .map_err(|e| RequestError::Client(e.to_string()))
    }

    fn client(&self) -> Result<&AsyncClient, RequestError> {
        self.client
            .as_ref()
            .ok_or_else(|| RequestError::Client("client not connected".to_string()))
    }
}
