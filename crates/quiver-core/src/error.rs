//! Error types for the quiver pipeline.

use thiserror::Error;

/// Result type alias using quiver's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for quiver operations.
///
/// Every variant carries a message rather than a wrapped source error so the
/// type stays `Clone`: single-flight cache waiters all receive the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// External service temporarily unreachable (connect failure, 429, 5xx)
    #[error("Transient service error: {0}")]
    Transient(String),

    /// External call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Inference/generation failed permanently (bad request, auth, model missing)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Graph database operation failed
    #[error("Graph database error: {0}")]
    Graph(String),

    /// Cache backend unreachable or returned garbage
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Downstream entity-detail service failed
    #[error("Downstream service error: {0}")]
    Downstream(String),

    /// Model output could not be parsed into the expected structure
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable, machine-readable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Transient(_) => "TRANSIENT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Inference(_) => "INFERENCE",
            Error::Graph(_) => "GRAPH_UNAVAILABLE",
            Error::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Error::Downstream(_) => "DOWNSTREAM",
            Error::MalformedOutput(_) => "MALFORMED_OUTPUT",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Config(_) => "CONFIG",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("I/O error: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Transient(e.to_string())
        } else {
            match e.status() {
                Some(s) if s.is_server_error() || s.as_u16() == 429 => {
                    Error::Transient(e.to_string())
                }
                _ => Error::Downstream(e.to_string()),
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}
