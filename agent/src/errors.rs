//! Error types for the host agent

use thiserror::Error;

/// Main error type for the host agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A container engine call (install/run/stop/query) failed
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// Fewer than two resource samples could be collected
    #[error("No samples: {0}")]
    NoSamples(String),

    #[error("Invalid samples: {0}")]
    InvalidSamples(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The trainer could not be reached or rejected the request
    #[error("Channel failure: {0}")]
    ChannelFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
