//! # Error Types
//!
//! Custom error types for the ingestion service using `thiserror`.

use thiserror::Error;

/// Main error type for the ingestion service
#[derive(Debug, Error)]
pub enum IngestError {
    /// Required configuration is absent (e.g. no serial port); never retried
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial device could not be opened
    #[error("Serial link unavailable: {0}")]
    LinkUnavailable(String),

    /// Open serial link failed while in use
    #[error("Serial link lost: {0}")]
    LinkLost(String),

    /// Record store rejected or could not perform an operation
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    /// HTTP server errors
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A background task panicked or was aborted
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Whether the error belongs to the serial link failure domain
    pub fn is_link_fault(&self) -> bool {
        matches!(self, IngestError::LinkUnavailable(_) | IngestError::LinkLost(_))
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::StoreUnavailable(e.to_string())
    }
}

/// Result type alias for the ingestion service
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_faults_are_classified() {
        assert!(IngestError::LinkLost("unplugged".into()).is_link_fault());
        assert!(IngestError::LinkUnavailable("/dev/ttyUSB0".into()).is_link_fault());
        assert!(!IngestError::StoreUnavailable("locked".into()).is_link_fault());
        assert!(!IngestError::ConfigurationMissing("serial.port".into()).is_link_fault());
    }

    #[test]
    fn test_sqlite_error_maps_to_store_unavailable() {
        let err: IngestError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, IngestError::StoreUnavailable(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = IngestError::LinkLost("device unplugged".to_string());
        assert_eq!(err.to_string(), "Serial link lost: device unplugged");
    }
}
