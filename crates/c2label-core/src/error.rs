//! Error types for c2label

use thiserror::Error;

/// Result type alias using c2label's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop the responder from starting or serving
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// The Kubernetes client could not be constructed
    #[error("Kubernetes client error: {0}")]
    Client(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a client construction error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
