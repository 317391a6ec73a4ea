//! Configuration for the gpsd exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// gpsd connection settings.
    #[serde(default)]
    pub gpsd: GpsdConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// gpsd control socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsdConfig {
    /// Address of the gpsd daemon (default: "localhost:2947").
    #[serde(default = "default_address")]
    pub address: String,

    /// Seconds between `?POLL;` requests (default: 1).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Dial timeout in seconds, 0 waits forever (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Drop the session when no line arrives for this many seconds,
    /// 0 waits forever (default: 30). Must exceed the poll interval.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// First delay before redialing a lost session (default: 100ms).
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the redial delay (default: 30s).
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

fn default_address() -> String {
    "localhost:2947".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_reconnect_initial() -> u64 {
    100
}

fn default_reconnect_max() -> u64 {
    30_000
}

impl GpsdConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }
}

impl Default for GpsdConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval_secs: default_poll_interval(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9100").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "gpsd").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "gpsd".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gpsd.address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "gpsd address must not be empty".to_string(),
            ));
        }

        if self.gpsd.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        // gpsd stays silent between polls when no device is attached
        if self.gpsd.read_timeout_secs != 0
            && self.gpsd.read_timeout_secs <= self.gpsd.poll_interval_secs
        {
            return Err(ConfigError::Validation(format!(
                "read_timeout_secs ({}) must exceed poll_interval_secs ({}) or be 0",
                self.gpsd.read_timeout_secs, self.gpsd.poll_interval_secs
            )));
        }

        if self.gpsd.reconnect_initial_ms > self.gpsd.reconnect_max_ms {
            return Err(ConfigError::Validation(
                "reconnect_initial_ms must not exceed reconnect_max_ms".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // Metric names must match [a-zA-Z_:][a-zA-Z0-9_:]*
        let prefix = &self.prometheus.prefix;
        let valid_prefix = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_prefix {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {:?}",
                prefix
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.gpsd.address, "localhost:2947");
        assert_eq!(config.gpsd.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.gpsd.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.prometheus.listen, "0.0.0.0:9100");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "gpsd");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            gpsd: {
                address: "10.0.0.5:2947",
                poll_interval_secs: 5,
                connect_timeout_secs: 0,
                read_timeout_secs: 0,
                reconnect_initial_ms: 250,
                reconnect_max_ms: 10000,
            },
            prometheus: {
                listen: "127.0.0.1:9101",
                path: "/gps/metrics",
                prefix: "gnss",
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.gpsd.address, "10.0.0.5:2947");
        assert_eq!(config.gpsd.poll_interval_secs, 5);
        assert_eq!(config.gpsd.connect_timeout(), None);
        assert_eq!(config.gpsd.read_timeout(), None);
        assert_eq!(config.gpsd.reconnect_initial_ms, 250);
        assert_eq!(config.prometheus.listen, "127.0.0.1:9101");
        assert_eq!(config.prometheus.path, "/gps/metrics");
        assert_eq!(config.prometheus.prefix, "gnss");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "metrics" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let result = ExporterConfig::parse(r#"{ gpsd: { poll_interval_secs: 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_read_timeout_exceeds_poll_interval() {
        let err = ExporterConfig::parse(r#"{ gpsd: { poll_interval_secs: 60 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("read_timeout_secs"));

        assert!(
            ExporterConfig::parse(r#"{ gpsd: { poll_interval_secs: 5, read_timeout_secs: 5 } }"#)
                .is_err()
        );
        assert!(
            ExporterConfig::parse(r#"{ gpsd: { poll_interval_secs: 5, read_timeout_secs: 6 } }"#)
                .is_ok()
        );
        assert!(
            ExporterConfig::parse(r#"{ gpsd: { poll_interval_secs: 60, read_timeout_secs: 0 } }"#)
                .is_ok()
        );
    }

    #[test]
    fn test_validate_backoff_bounds() {
        let result = ExporterConfig::parse(
            r#"{ gpsd: { reconnect_initial_ms: 5000, reconnect_max_ms: 1000 } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_prefix() {
        assert!(ExporterConfig::parse(r#"{ prometheus: { prefix: "9gps" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ prometheus: { prefix: "gps-d" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ prometheus: { prefix: "" } }"#).is_err());
        assert!(ExporterConfig::parse(r#"{ prometheus: { prefix: "gps_d" } }"#).is_ok());
    }
}
