//! Exponential backoff for connection retries.

use std::time::Duration;

/// Doubling delay, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Start at `initial`, never exceed `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self { max, current: initial }
    }

    /// Delay to wait before the next attempt. Each call doubles the
    /// following delay up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}
