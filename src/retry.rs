//! Bounded busy-poll retry policy
//!
//! The link, clock and broker stages all wait the same way: try, sleep a
//! fixed (or patterned) delay, try again until a limit is hit. [`RetryPolicy`]
//! describes the limit and the delays, [`RetryBudget`] tracks one run of it.
//!
//! ```rust
//! use std::time::Duration;
//! use terranode::retry::{RetryLimit, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::fixed(Duration::from_millis(1), RetryLimit::Attempts(3));
//! let mut budget = policy.begin();
//! let mut tries = 0;
//! loop {
//!     tries += 1;
//!     match budget.next_delay() {
//!         Some(delay) => tokio::time::sleep(delay).await,
//!         None => break,
//!     }
//! }
//! assert_eq!(tries, 3);
//! # });
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// When a retry loop gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Stop after this many attempts
    Attempts(u32),
    /// Stop once this much time has elapsed since the first attempt
    Elapsed(Duration),
    /// Never stop
    Unbounded,
}

/// Retry configuration shared by every cascade stage
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub limit: RetryLimit,
    /// Delays in milliseconds for the first retries (empty means fixed delay)
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay_ms: u64,
}

impl RetryPolicy {
    /// Fixed inter-poll delay with the given limit
    pub fn fixed(interval: Duration, limit: RetryLimit) -> Self {
        Self {
            limit,
            backoff_pattern: Vec::new(),
            sustained_delay_ms: interval.as_millis() as u64,
        }
    }

    /// Calculate backoff delay for given attempt using the pattern, then sustain
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay_ms)
    }

    /// Upper bound on time spent sleeping, None when unbounded
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        match self.limit {
            RetryLimit::Attempts(max_attempts) => Some(
                (1..max_attempts)
                    .map(|attempt| self.calculate_backoff_delay(attempt))
                    .sum(),
            ),
            RetryLimit::Elapsed(max) => Some(max.as_millis() as u64),
            RetryLimit::Unbounded => None,
        }
    }

    /// Reject policies that would spin without sleeping or never try at all
    pub fn validate(&self) -> Result<(), String> {
        if let RetryLimit::Attempts(0) = self.limit {
            return Err("attempt limit must be greater than 0".to_string());
        }
        if self.sustained_delay_ms == 0 {
            return Err("sustained delay must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Start a new retry run
    pub fn begin(&self) -> RetryBudget<'_> {
        RetryBudget {
            policy: self,
            started: Instant::now(),
            attempts: 0,
        }
    }
}

/// Progress through one retry run
#[derive(Debug)]
pub struct RetryBudget<'a> {
    policy: &'a RetryPolicy,
    started: Instant,
    attempts: u32,
}

impl RetryBudget<'_> {
    /// Record a failed attempt and return how long to wait before the next one
    ///
    /// Returns `None` once the limit is reached. With an elapsed-time limit the
    /// delay is clamped to the time left, so the run ends at most one attempt
    /// past the deadline.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        let delay = Duration::from_millis(self.policy.calculate_backoff_delay(self.attempts));

        match self.policy.limit {
            RetryLimit::Attempts(max) if self.attempts >= max => None,
            RetryLimit::Attempts(_) | RetryLimit::Unbounded => Some(delay),
            RetryLimit::Elapsed(max) => {
                let elapsed = self.started.elapsed();
                if elapsed >= max {
                    None
                } else {
                    Some(delay.min(max - elapsed))
                }
            }
        }
    }

    /// Failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left under an elapsed-time limit
    pub fn remaining(&self) -> Option<Duration> {
        match self.policy.limit {
            RetryLimit::Elapsed(max) => Some(max.saturating_sub(self.started.elapsed())),
            _ => None,
        }
    }
}
