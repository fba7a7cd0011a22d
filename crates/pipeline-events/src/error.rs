//! Error handling for the event-stream client.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// The main result type used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors produced by the push channel, the message channel, and configuration.
#[derive(Error, Debug)]
pub enum StreamError {
    /// HTTP client errors (wraps `reqwest::Error`)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-success HTTP status from the message endpoint
    #[error("API error: status={status}, body={body}")]
    Api { status: StatusCode, body: String },

    /// Structured `{ error: { code, messages } }` body from the message endpoint
    #[error("Dispatch rejected (code {code:?}): {}", .messages.join("; "))]
    Dispatch {
        code: Option<i64>,
        messages: Vec<String>,
    },

    /// Push channel answered with a non-success status
    #[error("Push channel returned status {status}")]
    InvalidStatus { status: StatusCode },

    /// Push channel answered with something other than `text/event-stream`
    #[error("Push channel returned content type {content_type:?}")]
    InvalidContentType { content_type: String },

    /// Malformed bytes on the push channel
    #[error("Stream decode error: {message}")]
    Decode { message: String },

    /// The server closed the push channel
    #[error("Push channel ended")]
    StreamEnded,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The client's background task is gone
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },
}

impl StreamError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an API error.
    pub fn api(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Returns `true` for push-channel answers that retrying will not fix.
    ///
    /// Authentication failures and missing streams are permanent, and so is
    /// a body the decoder rejects, since a reconnect replays it. Everything
    /// else (5xx, resets, timeouts, early EOF) is worth another attempt.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidStatus { status } => matches!(
                *status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ),
            Self::Config { .. } | Self::Decode { .. } => true,
            _ => false,
        }
    }
}
