//! Equal-jitter exponential backoff for partner delivery retries.
//!
//! The schedule itself — initial interval, multiplier, ceiling — is a
//! `backoff::ExponentialBackoff`, the same crate the teacher depends on
//! for this concern. The jitter shape built on top of it is deliberately
//! not the teacher's own style (a random fraction of the full computed
//! delay): partner delivery uses "equal jitter" instead — half the
//! computed delay is fixed, the other half is randomized, so retries
//! never cluster at either the minimum or maximum of the range. Base
//! 1s, multiplier 2, capped at 30s, at most 3 attempts.

use backoff::ExponentialBackoff;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub schedule: ExponentialBackoff,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule: ExponentialBackoff {
                initial_interval: Duration::from_secs(1),
                multiplier: 2.0,
                max_interval: Duration::from_secs(30),
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            },
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// `attempt` is zero-based: the delay before the *next* attempt
    /// after `attempt` has already failed. Reads the schedule's own
    /// base/multiplier/ceiling rather than calling `next_backoff`, so
    /// the same `attempt` always maps to the same full-delay range
    /// regardless of call order.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.schedule.initial_interval.as_secs_f64();
        let cap = self.schedule.max_interval.as_secs_f64();
        let exponential = base * self.schedule.multiplier.powi(attempt as i32);
        let full_delay = exponential.min(cap);
        let fixed = full_delay / 2.0;
        let jitter = rand::thread_rng().gen_range(0.0..=full_delay / 2.0);
        Duration::from_secs_f64(fixed + jitter)
    }
}
