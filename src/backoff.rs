//! Polling schedule for backend jobs.
//!
//! A [`BackoffPolicy`] maps an attempt number to the delay that precedes it.
//! Attempt 1 is always immediate. A [`PollBudget`] couples a policy with a
//! retry count and an overall timeout: it never sleeps past the deadline.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    Fixed { interval: Duration },
    /// `initial`, `2 * initial`, `4 * initial`, ... capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// No delay at all between attempts.
    pub fn immediate() -> Self {
        BackoffPolicy::Fixed {
            interval: Duration::ZERO,
        }
    }

    /// Delay to wait before `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match *self {
            BackoffPolicy::Fixed { interval } => interval,
            BackoffPolicy::Exponential { initial, max } => {
                // 2^(attempt-2), shift capped so the multiplication cannot overflow
                let factor = 1u32 << (attempt - 2).min(16);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Retry budget for one polling loop.
#[derive(Debug)]
pub struct PollBudget {
    policy: BackoffPolicy,
    retry: u32,
    timeout: Duration,
    started: Instant,
    attempts: u32,
}

impl PollBudget {
    pub fn new(policy: BackoffPolicy, retry: u32, timeout: Duration) -> Self {
        Self {
            policy,
            retry,
            timeout,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleep as the policy requires and claim the next attempt.
    ///
    /// Returns `false` when the retry count is spent or the next delay would
    /// run past the timeout. The first attempt is always granted.
    pub fn next_attempt(&mut self) -> bool {
        if self.attempts >= self.retry {
            return false;
        }
        let next = self.attempts + 1;
        let delay = self.policy.delay(next);
        if next > 1 && self.started.elapsed() + delay > self.timeout {
            return false;
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.attempts = next;
        true
    }
}
