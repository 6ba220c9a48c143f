pub mod config;
pub mod device;
pub mod mqtt;

use crate::config::Config;
use crate::device::Device;
use crate::mqtt::driver::SessionDriver;
use crate::mqtt::session::{ClientInfo, Session, SessionSettings};
use crate::mqtt::topics::TopicNamespace;
use crate::mqtt::transport::{BrokerLink, TlsMode};
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load().await?;
    setup_logging(config.logging.max_level());
    info!("Loaded configuration from {}", Config::config_path().display());

    let board_id = config.board_id().await;
    let client_id = config::client_id(&config.device.name, &board_id);
    let namespace = TopicNamespace::new(client_id, config.device.unique_topic);
    info!(
        "Client id {} (unique topics: {})",
        namespace.client_id(),
        namespace.is_unique()
    );

    let tls = TlsMode::load(&config.broker.tls).await?;
    let info = ClientInfo::new(
        &namespace,
        config.broker.credentials(),
        config.broker.keep_alive(),
        tls,
    );
    let settings = SessionSettings {
        broker_host: config.broker.host.clone(),
        broker_port: config.broker.effective_port(),
        max_topic_len: config.session.max_topic_len,
        max_payload_len: config.session.max_payload_len,
    };
    let session = Session::new(info, namespace, settings);

    let device = Device::from_config(&config.indicators)
        .map_err(|e| eyre!("Failed to set up indicators: {}", e))?;
    let link = BrokerLink::new(config.broker.host.clone(), config.session.request_capacity);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => error!("Unable to listen for interrupt: {}", e),
        }
    });

    let driver = SessionDriver::create(session, device, link, config.session.wake_interval());
    let running = driver.start().await?;
    let terminated = running.run_until_terminated(shutdown).await?;
    let session = terminated.finish();
    info!("Session ended after {}s", session.uptime().as_secs());

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
