//! Exponential retry delay after failed cycles.

use std::time::Duration;

/// Doubling delay from `base`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
        }
    }

    /// Resume from a persisted failure count.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay owed for the current failure count; zero when nothing failed.
    pub fn current_delay(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.checked_pow(self.attempts - 1).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |delay| delay.min(self.max))
    }

    /// Count one more failure and return the delay before the retry.
    pub fn fail(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.current_delay()
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = (0..5).map(|_| backoff.fail()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        backoff.fail();
        backoff.fail();
        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::ZERO);
        assert_eq!(backoff.fail(), Duration::from_millis(10));
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(300)).with_attempts(200);
        assert_eq!(backoff.current_delay(), Duration::from_secs(300));
    }
}
