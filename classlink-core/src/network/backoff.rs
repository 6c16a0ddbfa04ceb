//! Exponential reconnect delay.

use std::time::Duration;

/// Doubling delay with a ceiling.
///
/// The value handed out by [`next_delay`](Self::next_delay) for the
/// k-th consecutive failure is `min(initial * 2^(k-1), max)`, so after
/// `n` failures [`current`](Self::current) reads `min(initial * 2^n, max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait before the next attempt. Doubles the stored
    /// delay for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// The delay the next failure will be scheduled with.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
