//! Error types for the VM migration exporter

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the VM migration exporter
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Cluster API Errors
    // =========================================================================
    /// Request to the cluster API could not be completed
    #[error("Transport error calling {resource}: {source}")]
    Transport {
        resource: String,
        #[source]
        source: reqwest::Error,
    },

    /// Cluster API answered with something other than 200 OK
    #[error("Unexpected status code {status} from {resource}")]
    UnexpectedStatus { resource: String, status: u16 },

    /// Response body was not the JSON shape we expect
    #[error("Failed to decode {resource} response: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    /// A migration timestamp could not be parsed as RFC3339
    #[error("Invalid {field} timestamp {value:?} for VM {vm_name}: {source}")]
    TimestampParse {
        vm_name: String,
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A finished or failed migration entry lacks a timestamp
    #[error("Missing {field} timestamp for VM {vm_name}")]
    MissingTimestamp {
        vm_name: String,
        field: &'static str,
    },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    /// Metric family could not be created or registered
    #[error("Metrics registration failed: {0}")]
    MetricsRegistration(#[from] prometheus::Error),

    /// Registry could not be encoded for exposition
    #[error("Metrics encoding failed: {0}")]
    MetricsEncoding(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors raised while talking to the cluster API.
    ///
    /// These are never fatal: the scheduler logs them and the next cycle
    /// acts as the retry.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::UnexpectedStatus { .. } | Error::Decode { .. }
        )
    }
}
