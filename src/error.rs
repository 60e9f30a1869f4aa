// Error handling module
// Defines the client error taxonomy

use serde_json::Value;
use thiserror::Error;

/// Failure of the token refresh protocol.
///
/// Cloneable so a single refresh outcome can be handed to every queued caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// No refresh token in the store
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Refresh endpoint answered with a non-2xx status
    #[error("Refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Refresh endpoint answered 2xx with an unusable body
    #[error("Malformed refresh response: {0}")]
    MalformedResponse(String),

    /// Refresh call never produced a response
    #[error("Refresh request failed: {0}")]
    Network(String),

    /// The refresh task went away before reporting
    #[error("Refresh aborted")]
    Aborted,
}

/// Errors returned by [`crate::http_client::ApiClient`]
#[derive(Error, Debug)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("API error: {status} - {message}")]
    Http {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    /// Session could not be recovered after a 401
    #[error("Authentication failed: {0}")]
    Refresh(#[from] RefreshError),

    /// No response was received
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Request body could not be serialized; nothing was sent
    #[error("Encode error: {0}")]
    Encode(String),

    /// Response body could not be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Category of a transport failure, used for logging and notification rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Request,
    Body,
    Unknown,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Connect => "connection_failed",
            TransportKind::Request => "request_error",
            TransportKind::Body => "body_error",
            TransportKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl TransportKind {
    /// Categorize a reqwest error
    pub fn of(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportKind::Timeout
        } else if e.is_connect() {
            TransportKind::Connect
        } else if e.is_request() {
            TransportKind::Request
        } else if e.is_body() || e.is_decode() {
            TransportKind::Body
        } else {
            TransportKind::Unknown
        }
    }
}

impl ApiError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error is a transient server unavailability
    pub fn is_service_unavailable(&self) -> bool {
        self.status() == Some(503)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport {
            kind: TransportKind::of(&e),
            message: e.to_string(),
        }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
