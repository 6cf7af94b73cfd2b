// Error types for the Canary client. Every failure the library can raise
// is one of these variants; the CLI is the only layer that turns them into
// user-facing messages and exit codes.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid local input: unknown environment, transport or purpose, or a
    /// bad base URL. Never reaches the wire.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server spoke a protocol this client does not understand, or
    /// returned a response missing the expected attributes.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed, or the session was still refused after
    /// re-authenticating.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// HTTP transport failure (connection, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Error::Authorization(_))
    }

    /// True for the generic transport kind (network or malformed JSON).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Json(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
