//! Core type definitions for stream events and message acknowledgements.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{StreamError, StreamResult},
    state::ConnectionState,
};

/// Opaque name of a logical channel, e.g. a pipeline run or kernel session.
///
/// Immutable for the lifetime of one client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamIdentifier(String);

impl StreamIdentifier {
    /// Create a new identifier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier is empty.
    pub fn new(id: impl Into<String>) -> StreamResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(StreamError::config("Stream identifier cannot be empty"));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StreamIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One event received over the push channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Stream the event belongs to.
    pub uuid: String,
    /// Unique id of this event.
    pub event_uuid: String,
    /// Server timestamp.
    pub timestamp: i64,
    /// Event type, e.g. `status` or `stdout`.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Event payload.
    pub result: serde_json::Value,
    /// Optional error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// Acknowledgement returned by the message endpoint for a dispatched message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessAcknowledgement {
    /// Stream the message was sent to.
    pub uuid: String,
    /// Process that accepted the message.
    pub pid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitcode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server-assigned id of the message.
    pub message_uuid: String,
    /// Echo of [`MessageRequest::message_request_uuid`].
    pub message_request_uuid: String,
    pub timestamp: i64,
}

/// Body of an outbound message dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    /// Fresh client-generated id used to correlate the acknowledgement.
    pub message_request_uuid: String,
    /// Client timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Stream identifier.
    pub uuid: String,
}

impl MessageRequest {
    /// Build a request for `stream`, tagged with a new request id and the
    /// current time.
    pub fn new(stream: &StreamIdentifier, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_request_uuid: Uuid::new_v4().to_string(),
            timestamp: unix_millis(),
            uuid: stream.as_str().to_string(),
        }
    }
}

/// Structured error body returned by the message endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Response body of the message endpoint.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DispatchResponse {
    #[serde(default)]
    pub server_sent_event: Option<ProcessAcknowledgement>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// Which channel an [`ErrorRecord`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Push channel failure; triggers reconnection.
    Transport,
    /// Message dispatch failure; never touches connection state.
    Dispatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "Transport"),
            Self::Dispatch => write!(f, "Dispatch"),
        }
    }
}

/// An entry of the client's error log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ErrorRecord {
    /// Record `error` as an entry of the given kind, stamped with the current time.
    pub fn new(kind: ErrorKind, error: &StreamError) -> Self {
        Self {
            kind,
            message: error.to_string(),
            timestamp: unix_millis(),
        }
    }
}

/// Point-in-time view of everything a consumer can observe.
#[derive(Clone, Debug)]
pub struct StreamSnapshot {
    pub status: ConnectionState,
    /// Received events in arrival order; `None` marks a message awaiting its response.
    pub events: Vec<Option<StreamEvent>>,
    pub messages: Vec<ProcessAcknowledgement>,
    pub errors: Vec<ErrorRecord>,
    /// Last element of `events`, if it is a real event.
    pub recent_event: Option<StreamEvent>,
    /// Whether any dispatch is in flight.
    pub loading: bool,
    pub retries_remaining: u32,
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stream_identifier_rejects_empty() {
        assert!(StreamIdentifier::new("").is_err());
        assert!(StreamIdentifier::new("   ").is_err());
        let id = StreamIdentifier::new("run-1").expect("valid");
        assert_eq!(id.as_str(), "run-1");
        assert_eq!(id.to_string(), "run-1");
    }

    #[test]
    fn test_stream_event_from_json() {
        let event: StreamEvent = serde_json::from_value(json!({
            "uuid": "abc",
            "event_uuid": "e-1",
            "timestamp": 1_700_000_000_000_i64,
            "type": "stdout",
            "result": {"output": "hello"},
            "extra": true,
        }))
        .expect("deserialize");

        assert_eq!(event.uuid, "abc");
        assert_eq!(event.r#type, "stdout");
        assert_eq!(event.result, json!({"output": "hello"}));
        assert!(event.error.is_none());
    }

    #[test]
    fn test_stream_event_requires_core_fields() {
        let result: Result<StreamEvent, _> = serde_json::from_value(json!({
            "uuid": "abc",
            "timestamp": 1,
            "type": "stdout",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_message_request_tags() {
        let id = StreamIdentifier::new("abc").expect("valid");
        let first = MessageRequest::new(&id, "run");
        let second = MessageRequest::new(&id, "run");

        assert_eq!(first.uuid, "abc");
        assert_eq!(first.message, "run");
        assert!(Uuid::parse_str(&first.message_request_uuid).is_ok());
        assert_ne!(first.message_request_uuid, second.message_request_uuid);
        assert!(first.timestamp > 0);
    }

    #[test]
    fn test_dispatch_response_shapes() {
        let ok: DispatchResponse = serde_json::from_value(json!({
            "server_sent_event": {
                "uuid": "abc",
                "pid": 42,
                "is_alive": true,
                "message_uuid": "m-1",
                "message_request_uuid": "r-1",
                "timestamp": 5,
            }
        }))
        .expect("deserialize");
        let ack = ok.server_sent_event.expect("ack");
        assert_eq!(ack.pid, 42);
        assert_eq!(ack.is_alive, Some(true));
        assert!(ack.exitcode.is_none());
        assert!(ok.error.is_none());

        let err: DispatchResponse = serde_json::from_value(json!({
            "error": {"code": 500, "messages": ["kernel is not running"]}
        }))
        .expect("deserialize");
        assert!(err.server_sent_event.is_none());
        assert_eq!(
            err.error,
            Some(ApiErrorBody {
                code: Some(500),
                messages: vec!["kernel is not running".to_string()],
            })
        );
    }
}
