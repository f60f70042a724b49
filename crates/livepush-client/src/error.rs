//! Client error types.

use livepush_core::DecodeError;
use thiserror::Error;

/// Errors produced by the session, connection, and reconnect layers.
///
/// Most of these never leave the crate: they are logged and handled by the
/// reconnect engine. Only [`ClientError::SessionStartFailed`] and
/// [`ClientError::ShutdownInProgress`] reach the host from the public API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An operation did not finish in time.
    #[error("timed out: {context}")]
    Timeout {
        /// What was being waited for.
        context: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP status {status}")]
    HttpStatus {
        /// Status code.
        status: u16,
    },

    /// Platform returned a non-zero status code.
    #[error("API error ({code}): {message}")]
    Api {
        /// Platform status code.
        code: i64,
        /// Platform message.
        message: String,
    },

    /// Response or socket traffic did not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Undecodable frame.
    #[error("frame error: {0}")]
    Frame(#[from] DecodeError),

    /// Auth reply carried a non-zero code.
    #[error("authentication rejected with code {code}")]
    AuthRejected {
        /// Code from the auth reply body.
        code: i64,
    },

    /// Session start failed on every attempt.
    #[error("session start failed after {attempts} attempts: {last}")]
    SessionStartFailed {
        /// Attempts made.
        attempts: u32,
        /// Last underlying error.
        last: Box<ClientError>,
    },

    /// The client is closing or closed.
    #[error("client is shutting down")]
    ShutdownInProgress,

    /// JSON encoding/decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification, logged as `kind` and consulted by the reconnect loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP or socket I/O; retried with backoff.
    TransientNetwork,
    /// Malformed frame, header, or response shape.
    Protocol,
    /// Platform rejected the request.
    Api,
    /// Payload could not be decoded.
    Decode,
    /// Operation ignored because the client is closing.
    ShutdownInProgress,
}

impl ClientError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. } | Self::HttpStatus { .. } => {
                ErrorKind::TransientNetwork
            }
            Self::Protocol(_) | Self::Frame(_) => ErrorKind::Protocol,
            Self::Api { .. } | Self::AuthRejected { .. } | Self::SessionStartFailed { .. } => {
                ErrorKind::Api
            }
            Self::Json(_) => ErrorKind::Decode,
            Self::ShutdownInProgress => ErrorKind::ShutdownInProgress,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::ShutdownInProgress
    }

    pub(crate) fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
