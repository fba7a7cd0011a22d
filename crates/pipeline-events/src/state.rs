//! Connection state machine.
//!
//! | From | Transition | To |
//! |------|------------|----|
//! | `Connecting` | `Opened` | `Open` |
//! | `Connecting`, `Open` | `Errored` | `Reconnecting` |
//! | `Reconnecting` | `Retry` | `Connecting` |
//! | `Reconnecting` | `Exhausted` | `Failed` |
//! | `Open` | `Connect` | `Open` |
//! | `Connecting`, `Reconnecting`, `Closed`, `Failed` | `Connect` | `Connecting` |
//! | any | `Close` | `Closed` |
//!
//! Every update goes through [`ConnectionState::apply`]; the client never
//! assigns a state directly.

use std::fmt;

/// Lifecycle of the push channel as observed by the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The push channel is open and delivering frames.
    Open,
    /// The last attempt failed and a retry may be pending.
    Reconnecting {
        /// Consecutive failures in the current streak.
        attempt: u32,
    },
    /// Closed on request; reopened only by an explicit connect.
    Closed,
    /// The retry budget ran out or the failure was permanent.
    Failed,
}

/// Inputs to the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Consumer asked for a connection.
    Connect,
    /// Handshake succeeded.
    Opened,
    /// The transport failed.
    Errored {
        /// Consecutive failures including this one.
        attempt: u32,
    },
    /// A scheduled retry fired.
    Retry,
    /// No retry will be made.
    Exhausted,
    /// Consumer closed the client or unmounted.
    Close,
}

impl ConnectionState {
    /// Returns the state reached by applying `transition`, or `None` if the
    /// transition is not legal from this state.
    #[must_use]
    pub fn apply(self, transition: Transition) -> Option<Self> {
        use ConnectionState as S;
        use Transition as T;

        match (self, transition) {
            (_, T::Close) => Some(S::Closed),
            (S::Open, T::Connect) => Some(S::Open),
            (S::Connecting, T::Connect) => Some(S::Connecting),
            (S::Reconnecting { .. } | S::Closed | S::Failed, T::Connect) => Some(S::Connecting),
            (S::Connecting, T::Opened) => Some(S::Open),
            (S::Connecting | S::Open, T::Errored { attempt }) => Some(S::Reconnecting { attempt }),
            (S::Reconnecting { .. }, T::Retry) => Some(S::Connecting),
            (S::Reconnecting { .. }, T::Exhausted) => Some(S::Failed),
            _ => None,
        }
    }

    /// Returns `true` if the push channel is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if nothing will happen without an explicit connect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Reconnecting { attempt } => write!(f, "RECONNECTING({attempt})"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
