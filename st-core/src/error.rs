//! Global error types for StreamTweaks.
//!
//! Every failure category across the workspace is unified into a single
//! `StError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using StError.
pub type StResult<T> = Result<T, StError>;

/// Unified error type covering all error categories in StreamTweaks.
#[derive(Error, Debug)]
pub enum StError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Network errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request or connection attempt timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Server returned an error response.
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// An inbound protocol message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    // -- Authorization errors --
    /// Authentication failed or credentials are missing.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The authorization flow was superseded or abandoned.
    #[error("authorization cancelled")]
    AuthCancelled,

    // -- Contract errors --
    /// A caller supplied an invalid or blank argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    // -- Lifecycle errors --
    /// The component has been shut down and accepts no further operations.
    #[error("{0} has been shut down")]
    Shutdown(&'static str),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StError {
    /// Reject a blank required identifier.
    pub fn require_non_blank(value: &str, what: &str) -> StResult<()> {
        if value.trim().is_empty() {
            Err(StError::InvalidArgument(format!("{what} must not be blank")))
        } else {
            Ok(())
        }
    }

    /// Whether the error came from the network layer and is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) | Self::WebSocket(_) => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StError {
    fn from(e: serde_json::Error) -> Self {
        StError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for StError {
    fn from(e: toml::de::Error) -> Self {
        StError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_st_error_display() {
        let err = StError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");

        let err = StError::ServerError {
            status: 409,
            message: "subscription already exists".into(),
        };
        assert_eq!(
            err.to_string(),
            "server error (status 409): subscription already exists"
        );
    }

    #[test]
    fn test_require_non_blank() {
        assert!(StError::require_non_blank("abc", "login").is_ok());
        let err = StError::require_non_blank("   ", "login").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: login must not be blank");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StError::Timeout("t".into()).is_transient());
        assert!(StError::ServerError { status: 503, message: String::new() }.is_transient());
        assert!(!StError::ServerError { status: 400, message: String::new() }.is_transient());
        assert!(!StError::AuthCancelled.is_transient());
    }

    #[test]
    fn test_from_serde_json() {
        let err: StError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, StError::Serialization(_)));
    }
}
