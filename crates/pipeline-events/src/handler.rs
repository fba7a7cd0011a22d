//! Frame interpretation and lifecycle hooks.
//!
//! [`StreamHandler`] decides what an incoming [`Frame`] means for a given
//! stream. [`JsonEventHandler`] is the default: the frame data must be a JSON
//! [`StreamEvent`] whose `uuid` names the client's stream.

use tracing::debug;

use crate::{
    error::StreamError,
    frame::Frame,
    types::{StreamEvent, StreamIdentifier},
};

/// Result of decoding one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// A well-formed event for this stream; appended to the event log.
    Event(StreamEvent),
    /// A well-formed event for another stream; silently discarded.
    Foreign,
    /// Not a stream event (heartbeat, bad JSON); discarded.
    Malformed(String),
}

/// Trait for interpreting push-channel frames.
///
/// Implementors map frames to events, react to connection lifecycle
/// transitions, and decide whether reconnection should occur after errors.
pub trait StreamHandler: Send + Sync + 'static {
    /// Decode a frame received on the channel of `stream`.
    fn decode(&self, frame: &Frame, stream: &StreamIdentifier) -> FrameOutcome;

    /// Called when the push channel opens (or re-opens).
    ///
    /// Default implementation does nothing.
    fn on_connect(&self) {}

    /// Called when the push channel is lost or closed.
    ///
    /// Default implementation does nothing.
    fn on_disconnect(&self) {}

    /// Determine whether the connection should be retried after the given error.
    ///
    /// Default implementation returns `true` for all errors (always retry).
    fn should_retry(&self, _error: &StreamError) -> bool {
        true
    }
}

/// Decodes frame data as a JSON [`StreamEvent`] and keeps only events for the
/// client's own stream.
#[derive(Clone, Debug, Default)]
pub struct JsonEventHandler;

impl JsonEventHandler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StreamHandler for JsonEventHandler {
    fn decode(&self, frame: &Frame, stream: &StreamIdentifier) -> FrameOutcome {
        match serde_json::from_str::<StreamEvent>(&frame.data) {
            Ok(event) if event.uuid == stream.as_str() => FrameOutcome::Event(event),
            Ok(event) => {
                debug!(expected = %stream, got = %event.uuid, "Discarding frame for another stream");
                FrameOutcome::Foreign
            }
            Err(e) => FrameOutcome::Malformed(e.to_string()),
        }
    }

    fn should_retry(&self, error: &StreamError) -> bool {
        !error.is_permanent()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    fn frame(data: &str) -> Frame {
        Frame {
            event: "message".to_string(),
            data: data.to_string(),
            id: String::new(),
            retry: None,
        }
    }

    fn stream(id: &str) -> StreamIdentifier {
        StreamIdentifier::new(id).expect("valid identifier")
    }

    #[test]
    fn test_matching_event_is_decoded() {
        let handler = JsonEventHandler::new();
        let outcome = handler.decode(
            &frame(r#"{"uuid":"abc","event_uuid":"e1","timestamp":1,"type":"status","result":"busy"}"#),
            &stream("abc"),
        );
        let FrameOutcome::Event(event) = outcome else {
            panic!("expected event, got {outcome:?}");
        };
        assert_eq!(event.event_uuid, "e1");
        assert_eq!(event.result, serde_json::json!("busy"));
    }

    #[test]
    fn test_foreign_stream_is_discarded() {
        let handler = JsonEventHandler::new();
        let outcome = handler.decode(
            &frame(r#"{"uuid":"xyz","event_uuid":"e1","timestamp":1,"type":"status","result":null}"#),
            &stream("abc"),
        );
        assert_eq!(outcome, FrameOutcome::Foreign);
    }

    #[test]
    fn test_non_json_is_malformed() {
        let handler = JsonEventHandler::new();
        assert!(matches!(
            handler.decode(&frame("ping"), &stream("abc")),
            FrameOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_should_retry_skips_permanent_errors() {
        let handler = JsonEventHandler::new();
        assert!(handler.should_retry(&StreamError::StreamEnded));
        assert!(!handler.should_retry(&StreamError::InvalidStatus {
            status: StatusCode::UNAUTHORIZED
        }));
    }

    #[test]
    fn test_default_lifecycle_hooks() {
        let handler = JsonEventHandler::new();
        // These should not panic
        handler.on_connect();
        handler.on_disconnect();
    }
}
