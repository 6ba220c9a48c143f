//! Session driver.
//!
//! Owns the session, the broker link and the device, and runs the poll loop until the
//! session ends. The driver is a typestate machine:
//!
//! ```text
//! Idle --start()--> Running --run_until_terminated()--> Terminated --finish()
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use statum::{machine, state};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::SessionError;
use super::session::{ConnectionStatus, Effect, Session, SessionEvent};
use super::transport::BrokerLink;
use crate::device::{Device, StatusLights};

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Idle,
    Running,
    Terminated,
}

#[machine]
pub struct SessionDriver<S: DriverState> {
    session: Session,
    device: Device,
    link: BrokerLink,

    // Events waiting to be applied, in arrival order
    pending: VecDeque<SessionEvent>,

    wake_interval: Duration,
}

/// Why the loop woke up.
enum Wake {
    Network(Vec<SessionEvent>),
    Timer,
    Shutdown,
}

impl<S: DriverState> SessionDriver<S> {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Applies queued events until none are left. Effects may queue more.
    async fn drain(&mut self) -> Result<(), SessionError> {
        while let Some(event) = self.pending.pop_front() {
            let effects = match self.session.handle(event) {
                Ok(effects) => effects,
                Err(e) => {
                    error!("Session failed: {}", e);
                    self.device.set_status(StatusLights::FAILED);
                    return Err(e);
                }
            };
            for effect in effects {
                self.apply(effect).await;
            }
        }
        Ok(())
    }

    async fn apply(&mut self, effect: Effect) {
        debug!("Applying {:?}", effect);
        match effect {
            Effect::Resolve { host, port } => {
                let outcome = self.link.resolve(&host, port).await;
                self.pending.push_back(SessionEvent::Resolved(outcome));
            }
            Effect::Connect(address) => self.link.connect(address, self.session.client_info()),
            Effect::Subscribe { topic, qos } => {
                if let Err(e) = self.link.subscribe(&topic, qos) {
                    self.pending.push_back(SessionEvent::SubscribeDone(Err(e)));
                }
            }
            Effect::Unsubscribe { topic } => {
                if let Err(e) = self.link.unsubscribe(&topic) {
                    self.pending.push_back(SessionEvent::UnsubscribeDone(Err(e)));
                }
            }
            Effect::Publish {
                topic,
                payload,
                qos,
                retain,
            } => {
                if let Err(e) = self.link.publish(&topic, payload, qos, retain) {
                    self.pending.push_back(SessionEvent::PublishDone(Err(e)));
                }
            }
            Effect::Disconnect => {
                if let Err(e) = self.link.disconnect() {
                    error!("disconnect request failed: {}", e);
                    self.pending
                        .push_back(SessionEvent::ConnectStatus(ConnectionStatus::Disconnected));
                }
            }
            Effect::SetLed(on) => self.device.set_led(on),
            Effect::SetStatus(lights) => self.device.set_status(lights),
            Effect::Render(frame) => self.device.render(&frame),
        }
    }
}

impl SessionDriver<Idle> {
    pub fn create(
        session: Session,
        device: Device,
        link: BrokerLink,
        wake_interval: Duration,
    ) -> Self {
        debug!(
            "Creating session driver for {} (wake every {:?})",
            session.client_info().client_id,
            wake_interval
        );
        Self::new(session, device, link, VecDeque::new(), wake_interval)
    }

    /// Lights the status indicators and resolves the broker address.
    pub async fn start(mut self) -> Result<SessionDriver<Running>, SessionError> {
        self.device.set_status(StatusLights::STARTING);
        for effect in self.session.begin() {
            self.apply(effect).await;
        }
        self.drain().await?;

        info!("Session driver started, transitioning to Running state");
        Ok(self.transition())
    }
}

impl SessionDriver<Running> {
    /// Polls the broker until the session has connected and is no longer connected.
    ///
    /// A cancelled `shutdown` token is handled like an exit request once connected.
    /// Before the first connection it ends the loop right away.
    pub async fn run_until_terminated(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<SessionDriver<Terminated>, SessionError> {
        let mut wake = tokio::time::interval(self.wake_interval);
        wake.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_seen = false;

        while self.session.should_keep_running() {
            let reason = tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !shutdown_seen => Wake::Shutdown,
                events = self.link.poll() => Wake::Network(events),
                _ = wake.tick() => Wake::Timer,
            };

            match reason {
                Wake::Network(events) => self.pending.extend(events),
                Wake::Timer => debug!("Wake: {:?}", self.session.state()),
                Wake::Shutdown => {
                    shutdown_seen = true;
                    if !self.session.connect_done() {
                        info!("Shutdown requested before connecting");
                        break;
                    }
                    self.pending.push_back(SessionEvent::ShutdownRequested);
                }
            }

            self.drain().await?;
        }

        info!("Session loop finished ({:?})", self.session.state());
        Ok(self.transition())
    }
}

impl SessionDriver<Terminated> {
    pub fn finish(mut self) -> Session {
        self.device.set_status(StatusLights::STOPPED);
        info!("mqtt client exiting");
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::recording_device;
    use crate::mqtt::error::RequestError;
    use crate::mqtt::level::{LevelBucket, LevelFrame};
    use crate::mqtt::session::{ClientInfo, ConnectionState, SessionSettings};
    use crate::mqtt::topics::{Room, Topic, TopicNamespace};
    use crate::mqtt::transport::TlsMode;
    use rumqttc::QoS;
    use std::io;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // Nothing listens on port 1 of the loopback interface
    const CLOSED_PORT: u16 = 1;

    fn driver(device: Device, port: u16, capacity: usize) -> SessionDriver<Idle> {
        let namespace = TopicNamespace::new("picoe661", false);
        let info = ClientInfo::new(&namespace, None, Duration::from_secs(5), TlsMode::Disabled);
        let settings = SessionSettings {
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            max_topic_len: 100,
            max_payload_len: 256,
        };
        let session = Session::new(info, namespace, settings);
        SessionDriver::create(
            session,
            device,
            BrokerLink::new("127.0.0.1", capacity),
            Duration::from_secs(10),
        )
    }

    /// What the fake broker saw from the client.
    #[derive(Debug, Default)]
    struct BrokerLog {
        subscribes: usize,
        unsubscribes: usize,
        disconnects: usize,
    }

    async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; remaining];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    /// Minimal MQTT 3.1.1 broker for one client. Acknowledges everything and pushes
    /// `inbound` (QoS 0) once the whole topic set is subscribed.
    async fn fake_broker(
        listener: TcpListener,
        inbound: Vec<(&'static str, &'static str)>,
    ) -> io::Result<BrokerLog> {
        let (mut stream, _) = listener.accept().await?;
        let mut log = BrokerLog::default();
        loop {
            // client gone
            let Ok((header, body)) = read_packet(&mut stream).await else {
                return Ok(log);
            };
            match header >> 4 {
                1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
                3 => {
                    if (header >> 1) & 0x03 > 0 {
                        let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                        let pid = &body[2 + topic_len..4 + topic_len];
                        stream.write_all(&[0x40, 0x02, pid[0], pid[1]]).await?;
                    }
                }
                8 => {
                    log.subscribes += 1;
                    stream.write_all(&[0x90, 0x03, body[0], body[1], 0x01]).await?;
                    if log.subscribes == Topic::SUBSCRIBED.len() {
                        for (topic, payload) in &inbound {
                            stream.write_all(&publish_packet(topic, payload)).await?;
                        }
                    }
                }
                10 => {
                    log.unsubscribes += 1;
                    stream.write_all(&[0xB0, 0x02, body[0], body[1]]).await?;
                }
                12 => stream.write_all(&[0xD0, 0x00]).await?,
                14 => log.disconnects += 1,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn start_resolves_and_links() {
        let (device, recorders) = recording_device();
        let running = driver(device, CLOSED_PORT, 32).start().await.unwrap();

        assert_eq!(running.session().state(), ConnectionState::Connecting);
        assert!(running.session().broker_address().is_some());
        assert_eq!(*recorders.green.0.lock().unwrap(), vec![true, true]);
        assert_eq!(*recorders.red.0.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn device_effects_reach_the_sinks() {
        let (device, recorders) = recording_device();
        let mut driver = driver(device, CLOSED_PORT, 32);

        driver.apply(Effect::SetLed(true)).await;
        driver
            .apply(Effect::Render(LevelFrame::new(Room::Cozinha, 55)))
            .await;
        driver.apply(Effect::SetStatus(StatusLights::FAILED)).await;

        assert_eq!(recorders.led.last(), Some(true));
        assert_eq!(recorders.green.last(), Some(false));
        assert_eq!(recorders.red.last(), Some(true));
        let frames = recorders.display.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bucket, LevelBucket::Forty);
        assert!(driver.pending.is_empty());
    }

    #[tokio::test]
    async fn failed_requests_come_back_as_events() {
        let (device, _recorders) = recording_device();
        let mut driver = driver(device, CLOSED_PORT, 32);

        driver.apply(Effect::Disconnect).await;
        assert_eq!(
            driver.pending,
            vec![SessionEvent::ConnectStatus(ConnectionStatus::Disconnected)]
        );

        driver
            .apply(Effect::Subscribe {
                topic: "/led".to_string(),
                qos: QoS::AtLeastOnce,
            })
            .await;
        assert!(matches!(
            driver.pending.back(),
            Some(SessionEvent::SubscribeDone(Err(RequestError::Client(_))))
        ));
    }

    #[tokio::test]
    async fn refused_first_connect_is_fatal() {
        let (device, recorders) = recording_device();
        let running = driver(device, CLOSED_PORT, 32).start().await.unwrap();

        let result = running.run_until_terminated(CancellationToken::new()).await;
        assert!(matches!(result, Err(SessionError::ConnectFailed)));
        assert_eq!(recorders.green.last(), Some(false));
        assert_eq!(recorders.red.last(), Some(true));
    }

    #[tokio::test]
    async fn shutdown_before_connect_ends_loop() {
        let (device, recorders) = recording_device();
        let running = driver(device, CLOSED_PORT, 32).start().await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let terminated = running.run_until_terminated(shutdown).await.unwrap();
        let session = terminated.finish();

        assert!(!session.connect_done());
        assert_eq!(recorders.green.last(), Some(false));
        assert_eq!(recorders.red.last(), Some(true));
    }

    #[tokio::test]
    async fn connected_session_renders_then_exits_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(fake_broker(
            listener,
            vec![
                ("/led", "on"),
                ("/luminosidade/cozinha", "55"),
                ("/exit", ""),
            ],
        ));

        let (device, recorders) = recording_device();
        let running = driver(device, port, 32).start().await.unwrap();
        let terminated = tokio::time::timeout(
            Duration::from_secs(10),
            running.run_until_terminated(CancellationToken::new()),
        )
        .await
        .expect("session loop did not finish")
        .unwrap();
        let session = terminated.finish();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.subscriptions().count(), 0);
        assert!(session.subscriptions().disconnect_issued());

        let log = broker.await.unwrap().unwrap();
        assert_eq!(log.subscribes, 9);
        assert_eq!(log.unsubscribes, 9);
        assert_eq!(log.disconnects, 1);

        assert_eq!(recorders.led.last(), Some(true));
        assert_eq!(recorders.green.last(), Some(false));
        assert_eq!(recorders.red.last(), Some(true));
        let frames = recorders.display.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bucket, LevelBucket::Forty);
        assert_eq!(frames[0].room_label(), "Cozinha");
        assert_eq!(frames[0].text(), "55%");
    }

    #[tokio::test]
    async fn small_request_queue_fails_instead_of_hanging() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(fake_broker(listener, Vec::new()));

        let (device, recorders) = recording_device();
        let running = driver(device, port, 4).start().await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            running.run_until_terminated(CancellationToken::new()),
        )
        .await
        .expect("session loop did not finish");

        assert!(matches!(
            result,
            Err(SessionError::SubscribeFailed(RequestError::Client(_)))
        ));
        assert_eq!(recorders.red.last(), Some(true));
        broker.await.unwrap().unwrap();
    }
}
