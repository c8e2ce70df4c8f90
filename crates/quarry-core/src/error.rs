//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// GPU error
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Subsystem shut down while an operation was pending
    #[error("Shutdown in progress: {0}")]
    Shutdown(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
