//! Exponential backoff after failed fetches.
//!
//! The delay doubles with every consecutive failure, starting at
//! `base` and pinned at `ceiling`. The failure counter itself is capped at
//! `max_failures` so it can't grow without bound while a node is down for
//! a week. One success resets everything.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING, DEFAULT_BACKOFF_MAX_FAILURES};

/// Shape of the retry envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure, and the delay reported with zero
    /// failures.
    pub base: Duration,
    /// Upper bound on any delay.
    pub ceiling: Duration,
    /// Cap on the consecutive-failure counter.
    pub max_failures: u32,
}

impl BackoffPolicy {
    /// Builds a policy, clamping nonsense inputs: `base` is at least 1ms,
    /// `ceiling` at least `base`, and `max_failures` at least 1.
    pub fn new(base: Duration, ceiling: Duration, max_failures: u32) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            ceiling: ceiling.max(base),
            max_failures: max_failures.max(1),
        }
    }

    /// Delay to wait after `failures` consecutive failures.
    ///
    /// Non-decreasing in `failures`; `delay_for(0) == delay_for(1) == base`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .saturating_mul(2u32.pow(exponent))
            .min(self.ceiling)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BACKOFF_BASE,
            DEFAULT_BACKOFF_CEILING,
            DEFAULT_BACKOFF_MAX_FAILURES,
        )
    }
}

/// Per-key failure bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    consecutive_failures: u32,
    next_eligible_at: Option<Instant>,
}

impl BackoffState {
    /// Records a failure at `now` and returns the delay until the next
    /// attempt is allowed.
    pub fn record_failure(&mut self, now: Instant, policy: &BackoffPolicy) -> Duration {
        self.consecutive_failures = (self.consecutive_failures + 1).min(policy.max_failures);
        let delay = policy.delay_for(self.consecutive_failures);
        self.next_eligible_at = Some(now + delay);
        delay
    }

    /// Clears the failure streak.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Time left before a fetch is allowed, or `None` if one is allowed now.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_eligible_at
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    /// Consecutive failures so far (capped).
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay the policy prescribes for the current streak.
    pub fn current_delay(&self, policy: &BackoffPolicy) -> Duration {
        policy.delay_for(self.consecutive_failures)
    }
}
