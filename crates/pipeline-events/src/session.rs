//! Observable state shared between a client, its driver task and its
//! in-flight dispatches.
//!
//! Every mutation takes the write lock and checks the mounted flag under it,
//! so nothing is written once [`Session::unmount`] has returned. Watchers are
//! notified after the lock is released.

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    state::{ConnectionState, Transition},
    types::{ErrorRecord, ProcessAcknowledgement, StreamEvent, StreamSnapshot},
};

#[derive(Debug)]
struct SessionLog {
    mounted: bool,
    status: ConnectionState,
    events: Vec<Option<StreamEvent>>,
    messages: Vec<ProcessAcknowledgement>,
    errors: Vec<ErrorRecord>,
    in_flight: usize,
    retries_remaining: u32,
}

#[derive(Debug)]
pub(crate) struct Session {
    log: RwLock<SessionLog>,
    notify_lock: Mutex<()>,
    status_tx: watch::Sender<ConnectionState>,
    revision_tx: watch::Sender<u64>,
}

impl Session {
    pub(crate) fn new(retries_remaining: u32) -> Self {
        let (status_tx, _) = watch::channel(ConnectionState::Connecting);
        let (revision_tx, _) = watch::channel(0);
        Self {
            log: RwLock::new(SessionLog {
                mounted: true,
                status: ConnectionState::Connecting,
                events: Vec::new(),
                messages: Vec::new(),
                errors: Vec::new(),
                in_flight: 0,
                retries_remaining,
            }),
            notify_lock: Mutex::new(()),
            status_tx,
            revision_tx,
        }
    }

    /// Apply `f` if still mounted, then notify watchers.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionLog) -> R) -> Option<R> {
        let result = {
            let mut log = self.log.write();
            if !log.mounted {
                return None;
            }
            f(&mut log)
        };
        self.notify();
        Some(result)
    }

    fn notify(&self) {
        let _guard = self.notify_lock.lock();
        let status = self.log.read().status;
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
        self.revision_tx.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Stop accepting writes. Idempotent.
    pub(crate) fn unmount(&self) {
        self.log.write().mounted = false;
    }

    /// Apply a state machine transition; returns the new state if it was legal.
    pub(crate) fn transition(&self, transition: Transition) -> Option<ConnectionState> {
        self.mutate(|log| {
            let next = log.status.apply(transition);
            match next {
                Some(next) => log.status = next,
                None => debug!(from = %log.status, ?transition, "Ignoring illegal transition"),
            }
            next
        })
        .flatten()
    }

    pub(crate) fn push_event(&self, event: StreamEvent) {
        self.mutate(|log| log.events.push(Some(event)));
    }

    /// Append the awaiting-response placeholder and mark a dispatch in flight.
    pub(crate) fn begin_dispatch(&self) {
        self.mutate(|log| {
            log.events.push(None);
            log.in_flight += 1;
        });
    }

    pub(crate) fn finish_dispatch(&self) {
        self.mutate(|log| log.in_flight = log.in_flight.saturating_sub(1));
    }

    pub(crate) fn push_message(&self, ack: ProcessAcknowledgement) {
        self.mutate(|log| log.messages.push(ack));
    }

    pub(crate) fn push_error(&self, error: ErrorRecord) {
        self.mutate(|log| log.errors.push(error));
    }

    pub(crate) fn set_retries_remaining(&self, remaining: u32) {
        self.mutate(|log| log.retries_remaining = remaining);
    }

    pub(crate) fn status(&self) -> ConnectionState {
        self.log.read().status
    }

    pub(crate) fn events(&self) -> Vec<Option<StreamEvent>> {
        self.log.read().events.clone()
    }

    pub(crate) fn recent_event(&self) -> Option<StreamEvent> {
        self.log.read().events.last().cloned().flatten()
    }

    pub(crate) fn messages(&self) -> Vec<ProcessAcknowledgement> {
        self.log.read().messages.clone()
    }

    pub(crate) fn errors(&self) -> Vec<ErrorRecord> {
        self.log.read().errors.clone()
    }

    pub(crate) fn loading(&self) -> bool {
        self.log.read().in_flight > 0
    }

    pub(crate) fn retries_remaining(&self) -> u32 {
        self.log.read().retries_remaining
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        let log = self.log.read();
        StreamSnapshot {
            status: log.status,
            events: log.events.clone(),
            messages: log.messages.clone(),
            errors: log.errors.clone(),
            recent_event: log.events.last().cloned().flatten(),
            loading: log.in_flight > 0,
            retries_remaining: log.retries_remaining,
        }
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.status_tx.subscribe()
    }

    pub(crate) fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }
}
