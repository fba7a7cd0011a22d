//! Event-stream client and its background driver.
//!
//! Provides [`EventStreamClient`], which owns one push-channel connection for
//! one [`StreamIdentifier`], accumulates what it receives, and dispatches
//! outbound messages over the independent request/response channel.

use std::{pin::Pin, sync::Arc};

use futures_util::StreamExt;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Sleep, sleep},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::StreamConfig,
    connector::{ByteStream, ConnectRequest, Connector, HttpConnector},
    dispatch::{HttpDispatcher, MessageDispatcher},
    error::{StreamError, StreamResult},
    frame::FrameStream,
    handler::{FrameOutcome, JsonEventHandler, StreamHandler},
    reconnect::{ReconnectPolicy, RetryDecision},
    session::Session,
    state::{ConnectionState, Transition},
    types::{
        ErrorKind, ErrorRecord, MessageRequest, ProcessAcknowledgement, StreamEvent,
        StreamIdentifier, StreamSnapshot,
    },
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Control commands sent from [`EventStreamClient`] to the driver task.
/// Each carries an acknowledgement sent once the driver has applied it.
#[derive(Debug)]
enum Command {
    Connect(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`EventStreamClient`] with pluggable transports.
pub struct EventStreamClientBuilder {
    config: StreamConfig,
    connector: Option<Arc<dyn Connector>>,
    dispatcher: Option<Arc<dyn MessageDispatcher>>,
    handler: Option<Arc<dyn StreamHandler>>,
}

impl EventStreamClientBuilder {
    /// Use a custom push channel transport instead of [`HttpConnector`].
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use a custom message transport instead of [`HttpDispatcher`].
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: impl MessageDispatcher) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Use a custom frame handler instead of [`JsonEventHandler`].
    #[must_use]
    pub fn handler(mut self, handler: impl StreamHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Mount a client for `stream` and start connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails, a default
    /// transport cannot be built, or no tokio runtime is running.
    pub async fn mount(self, stream: StreamIdentifier) -> StreamResult<EventStreamClient> {
        let config = self.config;
        config.validate().map_err(StreamError::config)?;
        let runtime = Handle::try_current()
            .map_err(|e| StreamError::config(format!("No tokio runtime available: {e}")))?;

        let stream_url = config.stream_url(&stream).map_err(StreamError::config)?;
        let message_url = config.message_url(&stream).map_err(StreamError::config)?;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector::new(&config)?),
        };
        let dispatcher: Arc<dyn MessageDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(HttpDispatcher::new(&config)?),
        };
        let handler: Arc<dyn StreamHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(JsonEventHandler::new()),
        };

        let policy = ReconnectPolicy::new(
            config.max_connection_attempts,
            config.reconnect_base_delay,
        );
        let session = Arc::new(Session::new(policy.remaining()));
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);

        let driver = Driver {
            stream: stream.clone(),
            url: stream_url,
            session: Arc::clone(&session),
            connector,
            handler,
            policy,
            failures: 0,
            last_event_id: None,
            max_line_length: config.max_line_length,
            cmd_rx,
        };
        let driver = runtime.spawn(driver.run());

        info!(stream = %stream, "Event stream client mounted");
        Ok(EventStreamClient {
            stream,
            session,
            cmd_tx,
            dispatcher,
            message_url,
            runtime,
            driver,
        })
    }
}

// ---------------------------------------------------------------------------
// Public API: EventStreamClient
// ---------------------------------------------------------------------------

/// Client for one logical event stream.
///
/// Mounting spawns a background task that opens the push channel, appends
/// matching events to an ordered log, and reconnects with linear backoff
/// until the retry budget is spent. Dropping the client (or calling
/// [`unmount`](Self::unmount)) closes the connection, cancels any pending
/// reconnection and freezes all observable state.
pub struct EventStreamClient {
    stream: StreamIdentifier,
    session: Arc<Session>,
    cmd_tx: mpsc::Sender<Command>,
    dispatcher: Arc<dyn MessageDispatcher>,
    message_url: Url,
    runtime: Handle,
    driver: JoinHandle<()>,
}

impl EventStreamClient {
    /// Start building a client with custom transports or handler.
    pub fn builder(config: StreamConfig) -> EventStreamClientBuilder {
        EventStreamClientBuilder {
            config,
            connector: None,
            dispatcher: None,
            handler: None,
        }
    }

    /// Mount a client over HTTP with the default JSON handler.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub async fn mount(config: StreamConfig, stream: StreamIdentifier) -> StreamResult<Self> {
        Self::builder(config).mount(stream).await
    }

    /// Open the push channel.
    ///
    /// When already open this only restores the retry budget. A pending
    /// reconnection is superseded by an immediate attempt; a closed or failed
    /// client starts over with a full budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver task has shut down.
    pub async fn connect(&self) -> StreamResult<()> {
        self.command(Command::Connect).await
    }

    /// Close the push channel and cancel any pending reconnection.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver task has shut down.
    pub async fn close(&self) -> StreamResult<()> {
        self.command(Command::Close).await
    }

    async fn command(&self, build: fn(oneshot::Sender<()>) -> Command) -> StreamResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(ack_tx))
            .await
            .map_err(|_| StreamError::connection_closed("event stream driver shut down"))?;
        ack_rx
            .await
            .map_err(|_| StreamError::connection_closed("event stream driver shut down"))
    }

    /// Send a message over the request/response channel.
    ///
    /// A `None` placeholder is appended to the event log immediately. The
    /// acknowledgement, when it arrives, goes to the message log; a failure
    /// goes to the error log. Connection state is never affected. Returns the
    /// request id the acknowledgement will echo.
    ///
    /// The request runs on the runtime the client was mounted on, so this may
    /// be called from any thread.
    pub fn send_message(&self, message: impl Into<String>) -> String {
        let request = MessageRequest::new(&self.stream, message);
        let request_id = request.message_request_uuid.clone();
        self.session.begin_dispatch();

        let session = Arc::clone(&self.session);
        let dispatcher = Arc::clone(&self.dispatcher);
        let url = self.message_url.clone();
        self.runtime.spawn(async move {
            match dispatcher.dispatch(&url, &request).await {
                Ok(Some(ack)) => session.push_message(ack),
                Ok(None) => {
                    debug!(request = %request.message_request_uuid, "Message accepted without acknowledgement");
                }
                Err(err) => {
                    warn!(request = %request.message_request_uuid, error = %err, "Message dispatch failed");
                    session.push_error(ErrorRecord::new(ErrorKind::Dispatch, &err));
                }
            }
            session.finish_dispatch();
        });

        request_id
    }

    /// The stream this client is bound to.
    pub fn stream_id(&self) -> &StreamIdentifier {
        &self.stream
    }

    pub fn status(&self) -> ConnectionState {
        self.session.status()
    }

    /// Events in arrival order; `None` entries are message placeholders.
    pub fn events(&self) -> Vec<Option<StreamEvent>> {
        self.session.events()
    }

    /// The last entry of [`events`](Self::events), if it is a real event.
    pub fn recent_event(&self) -> Option<StreamEvent> {
        self.session.recent_event()
    }

    pub fn messages(&self) -> Vec<ProcessAcknowledgement> {
        self.session.messages()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.session.errors()
    }

    /// Whether any message dispatch is in flight.
    pub fn loading(&self) -> bool {
        self.session.loading()
    }

    pub fn retries_remaining(&self) -> u32 {
        self.session.retries_remaining()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.session.snapshot()
    }

    /// Watch connection state changes.
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe_status()
    }

    /// Watch a revision counter bumped on every observable change.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.session.subscribe_updates()
    }

    /// Tear the client down. Equivalent to dropping it.
    pub fn unmount(self) {}
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        self.session.transition(Transition::Close);
        self.session.unmount();
        self.driver.abort();
        debug!(stream = %self.stream, "Event stream client unmounted");
    }
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

enum Phase {
    /// No handle and no timer; waiting for a command.
    Idle,
    /// Handshake in flight.
    Connecting,
    Open(FrameStream<ByteStream>),
    /// Reconnection timer pending.
    Waiting(Pin<Box<Sleep>>),
}

/// The long-lived task that owns the push channel handle and the retry timer.
struct Driver {
    stream: StreamIdentifier,
    url: Url,
    session: Arc<Session>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn StreamHandler>,
    policy: ReconnectPolicy,
    failures: u32,
    last_event_id: Option<String>,
    max_line_length: usize,
    cmd_rx: mpsc::Receiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut phase = Phase::Connecting;
        loop {
            let next = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Open(frames) => self.open(frames).await,
                Phase::Waiting(timer) => self.waiting(timer).await,
            };
            match next {
                Some(next) => phase = next,
                None => {
                    debug!(stream = %self.stream, "Command channel closed, driver exiting");
                    return;
                }
            }
        }
    }

    async fn idle(&mut self) -> Option<Phase> {
        match self.cmd_rx.recv().await? {
            Command::Connect(ack) => {
                self.policy.reset();
                self.failures = 0;
                self.session.set_retries_remaining(self.policy.remaining());
                self.session.transition(Transition::Connect);
                let _ = ack.send(());
                Some(Phase::Connecting)
            }
            Command::Close(ack) => {
                self.session.transition(Transition::Close);
                let _ = ack.send(());
                Some(Phase::Idle)
            }
        }
    }

    async fn connecting(&mut self) -> Option<Phase> {
        let request = ConnectRequest {
            url: self.url.clone(),
            stream: self.stream.clone(),
            last_event_id: self.last_event_id.clone(),
        };
        info!(stream = %self.stream, url = %self.url, failures = self.failures, "Opening push channel");

        let connector = Arc::clone(&self.connector);
        let handshake = connector.open(&request);
        tokio::pin!(handshake);

        tokio::select! {
            biased;

            cmd = self.cmd_rx.recv() => match cmd? {
                Command::Connect(ack) => {
                    // Drop the in-flight handshake and start a fresh one.
                    self.session.transition(Transition::Connect);
                    let _ = ack.send(());
                    Some(Phase::Connecting)
                }
                Command::Close(ack) => {
                    self.session.transition(Transition::Close);
                    let _ = ack.send(());
                    Some(Phase::Idle)
                }
            },

            result = &mut handshake => Some(match result {
                Ok(body) => self.on_open(body),
                Err(err) => self.on_failure(err),
            }),
        }
    }

    fn on_open(&mut self, body: ByteStream) -> Phase {
        self.policy.on_open();
        self.failures = 0;
        self.session.set_retries_remaining(self.policy.remaining());
        self.session.transition(Transition::Opened);
        self.handler.on_connect();
        info!(stream = %self.stream, "Push channel open");

        let last_event_id = self.last_event_id.clone().unwrap_or_default();
        Phase::Open(
            FrameStream::with_last_event_id(body, last_event_id)
                .max_line_length(self.max_line_length),
        )
    }

    async fn open(&mut self, mut frames: FrameStream<ByteStream>) -> Option<Phase> {
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd? {
                    Command::Connect(ack) => {
                        // Already open: keep the handle, restore the budget.
                        self.policy.reset();
                        self.session.set_retries_remaining(self.policy.remaining());
                        self.session.transition(Transition::Connect);
                        let _ = ack.send(());
                    }
                    Command::Close(ack) => {
                        info!(stream = %self.stream, "Push channel closing (requested)");
                        self.handler.on_disconnect();
                        self.session.transition(Transition::Close);
                        let _ = ack.send(());
                        return Some(Phase::Idle);
                    }
                },

                item = frames.next() => match item {
                    Some(Ok(frame)) => {
                        if !frame.id.is_empty() {
                            self.last_event_id = Some(frame.id.clone());
                        }
                        if let Some(retry) = frame.retry {
                            debug!(retry_ms = retry.as_millis() as u64, "Server retry hint (linear policy stays in effect)");
                        }
                        match self.handler.decode(&frame, &self.stream) {
                            FrameOutcome::Event(event) => {
                                debug!(
                                    stream = %self.stream,
                                    event_uuid = %event.event_uuid,
                                    event_type = %event.r#type,
                                    "Event received",
                                );
                                self.session.push_event(event);
                            }
                            FrameOutcome::Foreign => {}
                            FrameOutcome::Malformed(reason) => {
                                debug!(stream = %self.stream, event = %frame.event, reason = %reason, "Discarding malformed frame");
                            }
                        }
                    }
                    Some(Err(err)) => return Some(self.on_failure(err)),
                    None => return Some(self.on_failure(StreamError::StreamEnded)),
                },
            }
        }
    }

    fn on_failure(&mut self, err: StreamError) -> Phase {
        self.failures = self.failures.saturating_add(1);
        error!(stream = %self.stream, error = %err, failures = self.failures, "Push channel failed");
        self.session
            .push_error(ErrorRecord::new(ErrorKind::Transport, &err));
        self.session.transition(Transition::Errored {
            attempt: self.failures,
        });
        self.handler.on_disconnect();

        if !self.handler.should_retry(&err) {
            warn!(stream = %self.stream, "Handler declined to retry, giving up");
            self.session.transition(Transition::Exhausted);
            return Phase::Idle;
        }

        match self.policy.on_failure() {
            RetryDecision::Retry(delay) => {
                self.session.set_retries_remaining(self.policy.remaining());
                warn!(
                    stream = %self.stream,
                    attempt = self.policy.max_attempts() - self.policy.remaining(),
                    delay_ms = delay.as_millis() as u64,
                    "Push channel reconnecting after backoff"
                );
                Phase::Waiting(Box::pin(sleep(delay)))
            }
            RetryDecision::GiveUp => {
                error!(
                    stream = %self.stream,
                    attempts = self.policy.max_attempts(),
                    "Retry budget exhausted"
                );
                self.session.transition(Transition::Exhausted);
                Phase::Idle
            }
        }
    }

    async fn waiting(&mut self, mut timer: Pin<Box<Sleep>>) -> Option<Phase> {
        tokio::select! {
            biased;

            cmd = self.cmd_rx.recv() => match cmd? {
                Command::Connect(ack) => {
                    // Supersede the pending timer with an immediate attempt.
                    self.session.transition(Transition::Connect);
                    let _ = ack.send(());
                    Some(Phase::Connecting)
                }
                Command::Close(ack) => {
                    self.session.transition(Transition::Close);
                    let _ = ack.send(());
                    Some(Phase::Idle)
                }
            },

            () = &mut timer => {
                self.session.transition(Transition::Retry);
                Some(Phase::Connecting)
            }
        }
    }
}
