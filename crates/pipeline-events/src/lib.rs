//! # Pipeline Events
//!
//! Resilient Server-Sent Events client for pipeline run telemetry.
//!
//! An [`EventStreamClient`] is mounted for one [`StreamIdentifier`]. It keeps a
//! single push-channel connection open, appends every event addressed to its
//! stream to an ordered log, and reconnects after failures with a bounded,
//! linearly increasing delay. Messages go out over a separate request/response
//! channel whose failures never disturb the push channel.
//!
//! ## Features
//!
//! - **Bounded reconnection**: the Nth retry of a failure streak waits
//!   `N * base_delay`; a successful open restores the full budget, an empty
//!   budget moves the client to [`ConnectionState::Failed`].
//! - **Cross-stream isolation**: frames naming another stream are discarded.
//! - **Resumption**: the last event id is sent as `Last-Event-ID` on reconnect.
//! - **Safe teardown**: dropping the client closes the connection, cancels the
//!   pending timer and freezes all observable state.
//! - **Pluggable transports**: [`Connector`], [`MessageDispatcher`] and
//!   [`StreamHandler`] are traits with HTTP/JSON defaults.
//!
//! ## Architecture
//!
//! ```text
//! EventStreamClient::mount(config, stream)
//!   ├─ spawns driver task ─► Connector::open ─► FrameStream ─► StreamHandler
//!   │     ├── commands: Connect, Close (mpsc)                       │
//!   │     └── failures ─► ReconnectPolicy ─► sleep(N * base)        │
//!   │                                                               ▼
//!   ├─ Session: status, events, messages, errors ◄───────── push_event
//!   │
//!   └─ send_message ─► Handle::spawn(MessageDispatcher::dispatch) ─► Session
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use pipeline_events::{EventStreamClient, StreamConfig, StreamIdentifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::new("http://localhost:6789")
//!     .max_connection_attempts(5)
//!     .reconnect_base_delay(Duration::from_secs(1));
//!
//! let client = EventStreamClient::mount(config, StreamIdentifier::new("run-42")?).await?;
//! let request_id = client.send_message("run");
//!
//! let mut updates = client.updates();
//! while updates.changed().await.is_ok() {
//!     if let Some(event) = client.recent_event() {
//!         println!("{} {}", event.r#type, event.result);
//!     }
//!     if client.messages().iter().any(|m| m.message_request_uuid == request_id) {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handler;
pub mod reconnect;
mod session;
pub mod state;
pub mod types;

pub use client::{EventStreamClient, EventStreamClientBuilder};
pub use config::StreamConfig;
pub use connector::{ByteStream, ConnectRequest, Connector, HttpConnector};
pub use dispatch::{HttpDispatcher, MessageDispatcher};
pub use error::{StreamError, StreamResult};
pub use frame::{Frame, FrameDecoder, FrameStream};
pub use handler::{FrameOutcome, JsonEventHandler, StreamHandler};
pub use reconnect::{ReconnectPolicy, RetryDecision};
pub use state::{ConnectionState, Transition};
pub use types::{
    ApiErrorBody, DispatchResponse, ErrorKind, ErrorRecord, MessageRequest,
    ProcessAcknowledgement, StreamEvent, StreamIdentifier, StreamSnapshot,
};
