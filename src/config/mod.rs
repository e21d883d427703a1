//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relay instances
    #[serde(default, rename = "relay")]
    pub relays: Vec<RelayConfig>,
    /// TLS material shared by all instances
    #[serde(default)]
    pub tls: TlsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// How a relay instance listens locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenType {
    /// Plain TCP listener
    #[default]
    Raw,
    /// TLS listener
    Tls,
    /// Multiplexed tunnel listener
    Mux,
}

impl FromStr for ListenType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "tls" => Ok(Self::Tls),
            "mux" => Ok(Self::Mux),
            other => Err(crate::Error::Config(format!(
                "Unknown listen type: {}",
                other
            ))),
        }
    }
}

/// How a relay instance reaches its remotes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// One plain TCP connection per inbound connection
    #[default]
    Raw,
    /// One TLS connection per inbound connection
    Tls,
    /// Logical streams over pooled, multiplexed tunnel connections
    Mux,
}

impl FromStr for TransportType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "tls" => Ok(Self::Tls),
            "mux" => Ok(Self::Mux),
            other => Err(crate::Error::Config(format!(
                "Unknown transport type: {}",
                other
            ))),
        }
    }
}

/// One relay instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local listen address
    pub listen: String,
    /// Listener flavor
    #[serde(default)]
    pub listen_type: ListenType,
    /// Remote addresses, used round-robin
    pub remotes: Vec<String>,
    /// Outbound transport flavor
    #[serde(default)]
    pub transport_type: TransportType,
    /// Dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: u64,
}

fn default_dial_timeout() -> u64 {
    3
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", crate::DEFAULT_PORT),
            listen_type: ListenType::default(),
            remotes: Vec::new(),
            transport_type: TransportType::default(),
            dial_timeout: default_dial_timeout(),
        }
    }
}

/// TLS material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Certificate chain path (PEM), for TLS/mux listeners
    pub cert: Option<String>,
    /// Private key path (PEM), for TLS/mux listeners
    pub key: Option<String>,
    /// Extra trusted CA bundle path (PEM), for TLS/mux dialers
    pub ca: Option<String>,
    /// Server name to present in the ClientHello
    pub sni: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [[relay]]
            listen = "0.0.0.0:1234"
            remotes = ["10.0.0.1:9001"]
            "#,
        )
        .unwrap();

        assert_eq!(config.relays.len(), 1);
        let relay = &config.relays[0];
        assert_eq!(relay.listen, "0.0.0.0:1234");
        assert_eq!(relay.listen_type, ListenType::Raw);
        assert_eq!(relay.transport_type, TransportType::Raw);
        assert_eq!(relay.dial_timeout, 3);
    }

    #[test]
    fn test_parse_mux_config() {
        let config: Config = toml::from_str(
            r#"
            [[relay]]
            listen = "0.0.0.0:1234"
            remotes = ["server.example.com:443"]
            transport_type = "mux"

            [[relay]]
            listen = "0.0.0.0:443"
            listen_type = "mux"
            remotes = ["127.0.0.1:22"]

            [tls]
            cert = "/etc/relay/cert.pem"
            key = "/etc/relay/key.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.relays[0].transport_type, TransportType::Mux);
        assert_eq!(config.relays[1].listen_type, ListenType::Mux);
        assert_eq!(config.tls.cert.as_deref(), Some("/etc/relay/cert.pem"));
    }

    #[test]
    fn test_parse_logging_config() {
        let config: Config = toml::from_str(
            r#"
            [[relay]]
            listen = "0.0.0.0:1234"
            remotes = ["10.0.0.1:9001"]

            [logging]
            level = "debug"
            format = "compact"
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_round_trip() {
        let config = Config {
            relays: vec![RelayConfig {
                listen: "127.0.0.1:8000".to_string(),
                remotes: vec!["127.0.0.1:9000".to_string()],
                ..RelayConfig::default()
            }],
            ..Config::default()
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.relays[0].listen, "127.0.0.1:8000");
    }

    #[test]
    fn test_type_from_str() {
        assert_eq!("MUX".parse::<TransportType>().unwrap(), TransportType::Mux);
        assert!("websocket".parse::<ListenType>().is_err());
    }
}
