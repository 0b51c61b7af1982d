//! Exponential reconnect backoff.

use std::time::Duration;

/// Exponential backoff with a hard cap on attempts.
///
/// Attempt `n` (1-based) waits `base × 2^n`. Once `max_attempts` have been
/// handed out, [`next_delay`](Self::next_delay) returns `None` and the caller
/// should give up. [`reset`](Self::reset) puts the counter back to zero after a
/// successful open.
///
/// ```
/// use std::time::Duration;
/// use coopsync_transport::Backoff;
///
/// let mut backoff = Backoff::new(Duration::from_millis(100), 2);
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Default delay unit.
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    /// Default retry budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Creates a backoff with the given base delay and retry budget.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay for a given 1-based attempt number, ignoring the budget.
    ///
    /// Saturates instead of overflowing for absurd attempt numbers.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Consumes one attempt from the budget and returns its delay.
    ///
    /// Returns `None` once the budget is exhausted. The counter does not
    /// advance past the cap.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt))
    }

    /// Number of attempts handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Resets the attempt counter to zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX_ATTEMPTS)
    }
}
