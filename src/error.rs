use thiserror::Error;

/// Unified error type for the presence client
#[derive(Error, Debug)]
pub enum PresenceError {
    // Credential errors
    #[error("No ID token available for the presence connection")]
    CredentialUnavailable,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Socket errors
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Socket open timed out")]
    ConnectTimeout,

    #[error("Socket is closed")]
    SocketClosed,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for presence operations
pub type Result<T> = std::result::Result<T, PresenceError>;

impl PresenceError {
    /// Whether the failure is a network-level condition that the close path recovers from
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PresenceError::Socket(_)
                | PresenceError::ConnectTimeout
                | PresenceError::SocketClosed
                | PresenceError::Io(_)
        )
    }

    /// Whether the failure came from the identity provider
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            PresenceError::CredentialUnavailable
                | PresenceError::Authentication(_)
                | PresenceError::InvalidCredentials
                | PresenceError::Jwt(_)
        )
    }
}

// Convert from WebSocket errors
impl From<tokio_tungstenite::tungstenite::Error> for PresenceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PresenceError::Socket(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PresenceError {
    fn from(err: url::ParseError) -> Self {
        PresenceError::InvalidEndpoint(err.to_string())
    }
}
