//! Error types for the gpsd exporter.

use thiserror::Error;

/// Errors raised while talking to gpsd or turning its reports into metrics.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Failed to connect to gpsd at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to gpsd at {0}")]
    ConnectTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON line from gpsd: {0}")]
    MalformedLine(#[source] serde_json::Error),

    #[error("Line from gpsd exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    #[error("Failed to parse time {value:?} for {metric}: {source}")]
    InvalidTimestamp {
        metric: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Schema mismatch for {metric}: {reason}")]
    SchemaMismatch { metric: String, reason: String },
}

impl ExporterError {
    /// Whether this error must stop the exporter.
    ///
    /// Transport errors on an established session are recovered by
    /// reconnecting; everything that indicates corrupt input or a drifted
    /// schema is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExporterError::Connect { .. } | ExporterError::ConnectTimeout(_) => true,
            ExporterError::Io(_) => false,
            ExporterError::MalformedLine(_)
            | ExporterError::LineTooLong { .. }
            | ExporterError::InvalidTimestamp { .. }
            | ExporterError::SchemaMismatch { .. } => true,
        }
    }
}

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_recoverable() {
        let err = ExporterError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_decode_errors_are_fatal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(ExporterError::MalformedLine(json_err).is_fatal());

        let mismatch = ExporterError::SchemaMismatch {
            metric: "gpsd_sat_foo".to_string(),
            reason: "text field".to_string(),
        };
        assert!(mismatch.is_fatal());
        assert!(ExporterError::LineTooLong { limit: 65536 }.is_fatal());
        assert!(mismatch.to_string().contains("gpsd_sat_foo"));
    }
}
