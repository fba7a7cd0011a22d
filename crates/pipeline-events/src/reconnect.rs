use std::time::Duration;

/// What to do after a push-channel failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry(Duration),
    /// Budget exhausted.
    GiveUp,
}

/// Bounded, linearly backed-off reconnection budget.
///
/// The Nth retry of a failure streak waits `base_delay * N`. Every scheduled
/// retry consumes one unit of budget whether or not it succeeds; a successful
/// open restores the full budget.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    remaining: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            remaining: max_attempts,
        }
    }

    /// Consume one unit of budget and return the delay before the next attempt.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.remaining == 0 {
            return RetryDecision::GiveUp;
        }
        let used = self.max_attempts - self.remaining;
        self.remaining -= 1;
        RetryDecision::Retry(self.base_delay.saturating_mul(used.saturating_add(1)))
    }

    /// The connection opened; the next failure starts a fresh streak.
    pub fn on_open(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.remaining = self.max_attempts;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}
