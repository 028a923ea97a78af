//! Rate-limit backoff for the search producer.
//!
//! When the search API reports rate exhaustion, [`BackoffController`] decides
//! how long to wait before retrying the same page, in priority order:
//!
//! 1. An explicit `Retry-After` → wait exactly that long.
//! 2. A reset timestamp plus a remaining-quota counter → wait until one
//!    second past the reset.
//! 3. Neither → exponential backoff, `60 * 2^retries` seconds, bounded by
//!    `max_retries`. Only this branch consumes a retry.
//!
//! Giving up is scoped to the current term: the producer stops paginating it
//! and moves on to the next one.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::Clock;

/// Base delay of the exponential branch, in seconds.
pub const BASE_BACKOFF_SECS: u64 = 60;

/// Rate-limit information carried by a throttled response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// `Retry-After`, in seconds.
    pub retry_after_secs: Option<u64>,
    /// `X-RateLimit-Reset`, as a unix timestamp.
    pub reset_at: Option<i64>,
    /// `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    Wait(Duration),
    GiveUp,
}

/// Retry bookkeeping for one term's pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug)]
pub struct BackoffController {
    state: RateLimitState,
}

impl BackoffController {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: RateLimitState {
                retry_count: 0,
                max_retries,
            },
        }
    }

    pub fn state(&self) -> RateLimitState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count
    }

    /// Compute the wait for `signal` at time `now`, updating the retry count.
    pub fn decide(&mut self, signal: &RateLimitSignal, now: DateTime<Utc>) -> BackoffDecision {
        if let Some(secs) = signal.retry_after_secs {
            return BackoffDecision::Wait(Duration::from_secs(secs));
        }

        if let (Some(reset_at), Some(_)) = (signal.reset_at, signal.remaining) {
            let wait = reset_at
                .saturating_sub(now.timestamp())
                .saturating_add(1)
                .max(0) as u64;
            return BackoffDecision::Wait(Duration::from_secs(wait));
        }

        if self.state.retry_count >= self.state.max_retries {
            return BackoffDecision::GiveUp;
        }
        let factor = 1u64
            .checked_shl(self.state.retry_count)
            .unwrap_or(u64::MAX);
        let wait = BASE_BACKOFF_SECS.saturating_mul(factor);
        self.state.retry_count += 1;
        BackoffDecision::Wait(Duration::from_secs(wait))
    }

    /// Decide and, unless giving up, sleep on `clock`.
    ///
    /// Returns `true` if the caller should retry the request, `false` if the
    /// term should be abandoned.
    pub async fn wait(&mut self, signal: &RateLimitSignal, clock: &dyn Clock) -> bool {
        match self.decide(signal, clock.now()) {
            BackoffDecision::Wait(delay) => {
                log::warn!(
                    "Rate limit exceeded. Waiting {}s before retrying (retries used: {}/{})",
                    delay.as_secs(),
                    self.state.retry_count,
                    self.state.max_retries
                );
                clock.sleep(delay).await;
                true
            }
            BackoffDecision::GiveUp => {
                log::warn!(
                    "Rate limit exceeded. Max retries ({}) reached, abandoning term",
                    self.state.max_retries
                );
                false
            }
        }
    }
}
