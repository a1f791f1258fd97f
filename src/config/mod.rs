use crate::route::Route;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Routes announced as `Added` at startup
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Broker session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on dial + CONNACK
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for a SUBACK
    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,
    /// Buffered publishes per connection; further publishes are dropped while it is full
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_subscribe_timeout_secs() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    64
}

fn default_client_id_prefix() -> String {
    "brokerchannel".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            subscribe_timeout_secs: default_subscribe_timeout_secs(),
            channel_capacity: default_channel_capacity(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}

/// Event delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Per-request HTTP timeout. Keep below `shutdown.timeout_secs`.
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Graceful shutdown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long a connection may take to acknowledge close
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Route API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_port() -> u16 {
    3002
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
        }
    }
}

impl BridgeConfig {
    /// Applies environment overrides on top of file values.
    ///
    /// - `API_PORT` → `api.port`
    /// - `DELIVERY_TIMEOUT_SECS` → `delivery.timeout_secs`
    /// - `SHUTDOWN_TIMEOUT_SECS` → `shutdown.timeout_secs`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("API_PORT") {
            self.api.port = v.parse().context("API_PORT must be a valid port number")?;
        }
        if let Ok(v) = std::env::var("DELIVERY_TIMEOUT_SECS") {
            self.delivery.timeout_secs = v
                .parse()
                .context("DELIVERY_TIMEOUT_SECS must be a number of seconds")?;
        }
        if let Ok(v) = std::env::var("SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown.timeout_secs = v
                .parse()
                .context("SHUTDOWN_TIMEOUT_SECS must be a number of seconds")?;
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: BridgeConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise returns defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        Ok(BridgeConfig::default())
    }
}
