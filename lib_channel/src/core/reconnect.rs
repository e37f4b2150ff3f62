//! # Reconnect Scheduler
//!
//! Exponential backoff between connection attempts. The first retry waits the
//! minimum delay, every further one doubles it up to the maximum. A limit of
//! `-1` retries forever.

use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after the given delay.
    Retry(Duration),
    /// The attempt limit is used up.
    Exhausted,
}

/// Backoff state of one channel.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    attempts: u32,
    current_delay: Duration,
    min_delay: Duration,
    max_delay: Duration,
    attempt_limit: i32,
}

impl ReconnectScheduler {
    /// Creates a scheduler. `attempt_limit` of `-1` means unlimited.
    pub fn new(min_delay: Duration, max_delay: Duration, attempt_limit: i32) -> Self {
        Self {
            attempts: 0,
            current_delay: Duration::ZERO,
            min_delay,
            max_delay: max_delay.max(min_delay),
            attempt_limit,
        }
    }

    /// Counts a failed attempt and returns the delay before the next one.
    pub fn record_failure(&mut self) -> ReconnectDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempt_limit >= 0 && self.attempts >= self.attempt_limit as u32 {
            return ReconnectDecision::Exhausted;
        }

        self.current_delay = if self.current_delay.is_zero() {
            self.min_delay
        } else {
            self.current_delay.saturating_mul(2).min(self.max_delay)
        };
        ReconnectDecision::Retry(self.current_delay)
    }

    /// Clears the backoff after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }

    /// Failed attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay used for the most recent retry; zero when connected.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// The configured attempt limit.
    pub fn attempt_limit(&self) -> i32 {
        self.attempt_limit
    }
}
