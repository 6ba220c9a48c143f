//! # Device Configuration
//!
//! TOML file read once at startup. Every field has a default, so a missing file is
//! written out with the defaults and the device still comes up.
//!
//! Lookup order for the file:
//! 1. `$ILUMINACAO_CONFIG`
//! 2. `<config dir>/iluminacao/config.toml`

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mqtt::topics::Topic;

const CONFIG_ENV: &str = "ILUMINACAO_CONFIG";
const CONFIG_DIR: &str = "iluminacao";
const CONFIG_FILE: &str = "config.toml";
const MACHINE_ID: &str = "/etc/machine-id";
const FALLBACK_BOARD_ID: &str = "0000";
const BOARD_ID_CHARS: usize = 4;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub indicators: IndicatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    /// Hex board id, read from the machine id when unset
    pub board_id: Option<String>,
    /// Prefix every topic with `/<client-id>`
    pub unique_topic: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "pico".to_string(),
            board_id: None,
            unique_topic: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub tls: TlsConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            tls_port: 8883,
            username: None,
            password: None,
            keep_alive_secs: 60,
            tls: TlsConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Username and password, only when both are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Ignoring incomplete broker credentials");
                None
            }
            (None, None) => None,
        }
    }

    /// Port the client connects to, depending on TLS.
    pub fn effective_port(&self) -> u16 {
        if self.tls.enabled {
            self.tls_port
        } else {
            self.port
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub wake_interval_secs: u64,
    pub max_topic_len: usize,
    pub max_payload_len: usize,
    pub request_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_interval_secs: 10,
            max_topic_len: crate::mqtt::topics::TOPIC_LEN,
            max_payload_len: 256,
            request_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs.max(1))
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorBackend {
    #[default]
    Log,
    Gpio,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub backend: IndicatorBackend,
    /// BCM pin numbers
    pub led_pin: u8,
    pub green_pin: u8,
    pub red_pin: u8,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            backend: IndicatorBackend::Log,
            led_pin: 17,
            green_pin: 27,
            red_pin: 22,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> tracing::Level {
        match self.level.parse() {
            Ok(level) => level,
            Err(_) => tracing::Level::INFO,
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // every subscribe plus the online publish are queued before the broker answers
        let needed = Topic::SUBSCRIBED.len() + 1;
        if self.session.request_capacity < needed {
            return Err(eyre!(
                "session.request_capacity must be at least {} (got {})",
                needed,
                self.session.request_capacity
            ));
        }
        if self.session.max_topic_len < 2 {
            return Err(eyre!("session.max_topic_len must be at least 2"));
        }
        Ok(())
    }

    /// Loads the configuration, writing the defaults first if the file is missing.
    pub async fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::ensure_default_config(&path).await?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        info!("Creating default configuration at {}", path.display());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Board id from the config, else the machine id, else a fixed fallback.
    pub async fn board_id(&self) -> String {
        if let Some(id) = &self.device.board_id {
            return id.clone();
        }
        match tokio::fs::read_to_string(MACHINE_ID).await {
            Ok(content) => match content.lines().next().map(str::trim) {
                Some(line) if !line.is_empty() => line.to_string(),
                _ => FALLBACK_BOARD_ID.to_string(),
            },
            Err(e) => {
                warn!("Unable to read {}: {}", MACHINE_ID, e);
                FALLBACK_BOARD_ID.to_string()
            }
        }
    }
}

/// Client id: device name followed by the first characters of the board id in lowercase.
pub fn client_id(name: &str, board_id: &str) -> String {
    let suffix: String = board_id.chars().take(BOARD_ID_CHARS).collect();
    format!("{}{}", name, suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.device.name, "pico");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.session.max_payload_len, 256);
        assert_eq!(config.indicators.backend, IndicatorBackend::Log);
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml(
            r#"
            [device]
            name = "painel"
            board_id = "E661A4D1"
            unique_topic = true

            [broker]
            host = "192.168.1.107"
            username = "casa"
            password = "segredo"

            [broker.tls]
            enabled = true
            ca_cert = "/etc/iluminacao/ca.crt"

            [indicators]
            backend = "gpio"
            led_pin = 5

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert!(config.device.unique_topic);
        assert_eq!(config.broker.host, "192.168.1.107");
        assert_eq!(
            config.broker.credentials(),
            Some(("casa".to_string(), "segredo".to_string()))
        );
        assert_eq!(config.broker.effective_port(), 8883);
        assert_eq!(
            config.broker.tls.ca_cert,
            Some(PathBuf::from("/etc/iluminacao/ca.crt"))
        );
        assert_eq!(config.indicators.backend, IndicatorBackend::Gpio);
        assert_eq!(config.indicators.led_pin, 5);
        assert_eq!(config.indicators.red_pin, 22);
        assert_eq!(config.logging.max_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn request_capacity_must_hold_the_connect_burst() {
        assert!(Config::from_toml("[session]\nrequest_capacity = 0").is_err());
        assert!(Config::from_toml("[session]\nrequest_capacity = 9").is_err());
        let config = Config::from_toml("[session]\nrequest_capacity = 10").unwrap();
        assert_eq!(config.session.request_capacity, 10);
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn incomplete_credentials_are_dropped() {
        let broker = BrokerConfig {
            username: Some("casa".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(broker.credentials(), None);
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let logging = LoggingConfig {
            level: "loud".to_string(),
        };
        assert_eq!(logging.max_level(), tracing::Level::INFO);
    }

    #[test]
    fn client_id_uses_board_prefix() {
        assert_eq!(client_id("pico", "E661A4D1B2"), "picoe661");
        assert_eq!(client_id("Painel", "AB"), "Painelab");
        assert_eq!(client_id("PICO", "E661"), "PICOe661");
    }

    #[tokio::test]
    async fn configured_board_id_wins() {
        let mut config = Config::default();
        config.device.board_id = Some("CAFE0001".to_string());
        assert_eq!(config.board_id().await, "CAFE0001");
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = std::env::temp_dir().join(format!("iluminacao-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = tokio::fs::remove_dir_all(&dir).await;

        Config::ensure_default_config(&path).await.unwrap();
        let config = Config::load_from(&path).await.unwrap();
        assert_eq!(config, Config::default());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
