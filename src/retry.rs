//! Reconnect pacing for the stream driver.
//!
//! The driver never gives up on a stream. This module only decides how long
//! to wait between two consecutive failed connection attempts.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::Duration;

/// Policy controlling the delay between stream reconnect attempts.
///
/// There is no attempt cap: the driver keeps reconnecting for as long as the
/// client is alive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay used before the first reconnect after a failure.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each reconnect delay.
    pub jitter: Duration,
}

impl ReconnectPolicy {
    /// Reconnects immediately after every failure.
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Exponential backoff starting at `initial_backoff`, capped at
    /// `max_backoff`, with up to `jitter` added per attempt.
    pub fn exponential(initial_backoff: Duration, max_backoff: Duration, jitter: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            jitter,
        }
    }

    /// Computes the delay to apply before the given reconnect attempt.
    ///
    /// `attempt` is 1-based and counts consecutive failures since the last
    /// session that became active.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31) as u32;
        let backoff = self
            .initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff);
        backoff.saturating_add(self.jitter_for(attempt))
    }

    /// Random offset in `0..=jitter`.
    fn jitter_for(&self, attempt: usize) -> Duration {
        let limit = self.jitter.as_nanos().min(u128::from(u64::MAX)) as u64;
        if limit == 0 {
            return Duration::ZERO;
        }
        let seed = RandomState::new().hash_one(attempt);
        Duration::from_nanos(seed % limit.saturating_add(1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}
