//! Configuration Module
//!
//! Provides TOML-based configuration for mqtt2opcua with support for:
//! - Bus connection settings (`[mqtt]`)
//! - Address space endpoint settings (`[opcua]`)
//! - Bridge behaviour (`[bridge]`) and declarative handler rules
//!   (`[[forward]]`, `[[backward]]`)
//! - Environment variable overrides (MQTT2OPCUA__* prefix)

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::convert::ForwardDefault;
use crate::protocol::QoS;

pub use handlers::{BackwardRule, ForwardRule};

mod handlers;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Bus connection
    pub mqtt: MqttConfig,
    /// Address space endpoint
    pub opcua: OpcUaConfig,
    /// Bridge behaviour
    pub bridge: BridgeConfig,
    /// Typed forward conversions
    pub forward: Vec<ForwardRule>,
    /// Outbound topic templates
    pub backward: Vec<BackwardRule>,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
    /// Shorthand for `level = "debug"`
    pub debug: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug: false,
        }
    }
}

impl LogConfig {
    /// Level after applying the debug switch
    pub fn effective_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.level
        }
    }
}

/// Bus connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Client ID used when connecting
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    pub keepalive: u16,
    /// QoS used for subscriptions (0 or 1)
    pub qos: u8,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Capacity of the outbound publish channel
    pub channel_capacity: usize,
}

fn default_client_id() -> String {
    format!("mqtt2opcua-{}", std::process::id())
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: 60,
            qos: 0,
            connect_timeout: 10,
            channel_capacity: 1024,
        }
    }
}

impl MqttConfig {
    /// `host:port` of the broker
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn subscription_qos(&self) -> QoS {
        QoS::from_u8(self.qos).unwrap_or_default()
    }
}

/// Address space endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpcUaConfig {
    pub host: String,
    pub port: u16,
    /// Resource path appended to the endpoint URL
    pub name: String,
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4334,
            name: "UA/MQTT Bridge Server".to_string(),
        }
    }
}

impl OpcUaConfig {
    pub fn endpoint_url(&self) -> String {
        format!("opc.tcp://{}:{}/{}", self.host, self.port, self.name)
    }
}

/// Bridge behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Wait for the device to echo a write before serving it on reads
    pub roundtrip: bool,
    /// Give up waiting for the echo after this long (e.g. "30s")
    #[serde(with = "humantime_serde")]
    pub roundtrip_timeout: Option<Duration>,
    /// Topic filters subscribed on connect
    pub topics: Vec<String>,
    /// Conversion used when no `[[forward]]` rule matches
    pub default_forward: ForwardDefault,
}

fn default_topics() -> Vec<String> {
    vec!["$SYS/#".to_string(), "#".to_string()]
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            roundtrip: false,
            roundtrip_timeout: None,
            topics: default_topics(),
            default_forward: ForwardDefault::default(),
        }
    }
}

/// Prometheus endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `/metrics`, `/health` and `/ready`
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQTT2OPCUA__` prefix with double underscores for nesting:
    ///    - `MQTT2OPCUA__MQTT__HOST=broker` overrides `mqtt.host`
    ///    - `MQTT2OPCUA__BRIDGE__ROUNDTRIP=true` overrides `bridge.roundtrip`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("log.debug", false)?
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883)?
            .set_default("mqtt.keepalive", 60)?
            .set_default("mqtt.qos", 0)?
            .set_default("opcua.host", "127.0.0.1")?
            .set_default("opcua.port", 4334)?
            .set_default("opcua.name", "UA/MQTT Bridge Server")?
            .set_default("bridge.roundtrip", false)?
            .set_default("metrics.enabled", false)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQTT2OPCUA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Validation("mqtt.port must not be 0".to_string()));
        }
        if self.opcua.port == 0 {
            return Err(ConfigError::Validation(
                "opcua.port must not be 0".to_string(),
            ));
        }
        if self.metrics.enabled && self.metrics.bind.port() == 0 {
            return Err(ConfigError::Validation(
                "metrics.bind needs an explicit port".to_string(),
            ));
        }
        if self.mqtt.qos > 1 {
            return Err(ConfigError::Validation("mqtt.qos must be 0 or 1".to_string()));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "mqtt.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.bridge.topics.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.topics must list at least one topic filter".to_string(),
            ));
        }
        for filter in &self.bridge.topics {
            crate::topic::validate_pattern(filter).map_err(|reason| {
                ConfigError::Validation(format!("invalid topic filter {:?}: {}", filter, reason))
            })?;
        }

        // Builds and discards the registry so bad patterns fail at startup
        self.handler_registry()?;

        Ok(())
    }
}
