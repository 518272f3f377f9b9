//! Error types for the glyco_core library.

use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glyco_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP transport error talking to the classification service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced cycle does not exist
    #[error("Cycle with ID {0} not found")]
    NotFound(Uuid),

    /// Import input could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// External meal classification failed on every attempt
    #[error("Classification error: {0}")]
    Classification(String),

    /// Notification permission was refused by the platform
    #[error("Notification permission denied")]
    PermissionDenied,

    /// Entry content or metadata does not match the entry type
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Persisted store could not be read back
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
