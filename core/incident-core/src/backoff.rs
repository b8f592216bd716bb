//! Reconnect delay for the incident stream.
//!
//! Exponential with a ceiling and no attempt limit: the stream is expected to
//! come back eventually and the dashboard keeps working on manual queries in
//! the meantime.

use std::cmp;
use std::time::{Duration, Instant};

use crate::config::StreamConfig;

#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial_ms: u64,
    max_ms: u64,
    attempts: u32,
}

impl RetryBackoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms: initial_ms.max(1),
            max_ms: max_ms.max(initial_ms.max(1)),
            attempts: 0,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.retry_initial_ms, config.retry_max_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay for the next attempt and counts it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = compute_delay_ms(self.initial_ms, self.max_ms, self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(delay)
    }

    /// The instant at which the next attempt is due.
    pub fn ready_at(&mut self, now: Instant) -> Instant {
        now + self.next_delay()
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

fn compute_delay_ms(initial_ms: u64, max_ms: u64, attempts: u32) -> u64 {
    let factor = 1u64.checked_shl(cmp::min(attempts, 32)).unwrap_or(u64::MAX);
    cmp::min(initial_ms.saturating_mul(factor), max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_ceiling() {
        let mut backoff = RetryBackoff::new(1_000, 30_000);
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = RetryBackoff::new(500, 4_000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        assert_eq!(compute_delay_ms(1_000, 30_000, u32::MAX), 30_000);
    }
}
