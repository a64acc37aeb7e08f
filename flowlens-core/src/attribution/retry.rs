//! Retry policy for transient attribution API failures

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// The first retry waits `base_delay`, each further retry doubles it, capped
/// at `max_delay`. Jitter adds up to half of the computed delay on top, so the
/// wait before retry `n + 1` is never shorter than the un-jittered wait before
/// retry `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first request.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// Five attempts: 0.5s, 1s, 2s, 4s between them (plus jitter)
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, with jitter applied.
    ///
    /// `floor` (from a `Retry-After` header) raises the delay when the
    /// server asks for a longer pause, still bounded by `max_delay`.
    pub fn delay_for(&self, retry: u32, floor: Option<Duration>) -> Duration {
        let mut delay = self.base_delay_for(retry);
        if self.jitter && !delay.is_zero() {
            let half = delay.as_millis() as u64 / 2;
            let extra = rand::thread_rng().gen_range(0..=half);
            delay += Duration::from_millis(extra);
        }
        match floor {
            Some(floor) => delay.max(floor.min(self.max_delay)),
            None => delay,
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
