//! Retry decisions for failed jobs.
//!
//! A failed job is re-enqueued as a new message carrying an incremented retry
//! count. The first retry goes straight back onto the stream; later retries are
//! parked in the delayed set with an exponential backoff until the attempt
//! budget is spent.

use crate::error::ErrorCategory;
use std::time::Duration;

/// Default number of retries before a job is given up on.
pub const DEFAULT_MAX_RETRIES: u32 = 25;

/// What the worker should do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue on the stream right away.
    Immediate { next: u32 },
    /// Re-enqueue after `delay`.
    Delayed { next: u32, delay: Duration },
    /// The retry budget is exhausted.
    GiveUp,
    /// The error is not retryable.
    Terminal,
}

impl RetryDecision {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryDecision::Immediate { .. } => "immediate",
            RetryDecision::Delayed { .. } => "delayed",
            RetryDecision::GiveUp => "give_up",
            RetryDecision::Terminal => "terminal",
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffSchedule {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry following `retry_count` failed retries.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(60 * 60),
        }
    }
}

/// Decides how a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffSchedule,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffSchedule::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Decide what happens to a job that failed with `category` after having
    /// already been retried `retry_count` times.
    pub fn decide(&self, category: ErrorCategory, retry_count: u32) -> RetryDecision {
        if !category.is_retryable() {
            return RetryDecision::Terminal;
        }

        match retry_count {
            0 => RetryDecision::Immediate { next: 1 },
            n if n <= self.max_retries => RetryDecision::Delayed {
                next: n + 1,
                delay: self.backoff.delay_for(n),
            },
            _ => RetryDecision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_retries_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 0),
            RetryDecision::Immediate { next: 1 }
        );
    }

    #[test]
    fn test_mid_budget_failure_is_delayed() {
        let policy = RetryPolicy::default();
        match policy.decide(ErrorCategory::RateLimited, 11) {
            RetryDecision::Delayed { next, delay } => {
                assert_eq!(next, 12);
                assert_eq!(delay, Duration::from_secs(60 * 60));
            }
            other => panic!("expected delayed retry, got {:?}", other),
        }
    }

    #[test]
    fn test_last_retry_still_allowed() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(ErrorCategory::Transient, 25),
            RetryDecision::Delayed { next: 26, .. }
        ));
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 26),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_permanent_errors_are_terminal() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorCategory::Permanent, 0),
            RetryDecision::Terminal
        );
    }

    #[test]
    fn test_backoff_schedule() {
        let backoff = BackoffSchedule::default();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(240));
        assert_eq!(backoff.delay_for(7), Duration::from_secs(1920));
        assert_eq!(backoff.delay_for(8), Duration::from_secs(3600));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(3600));
    }

    #[test]
    fn test_custom_limit() {
        let policy = RetryPolicy::new(2);
        assert!(matches!(
            policy.decide(ErrorCategory::Transient, 2),
            RetryDecision::Delayed { next: 3, .. }
        ));
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 3),
            RetryDecision::GiveUp
        );
    }
}
