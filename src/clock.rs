//! Time source and sleep abstraction.
//!
//! Every wait in the pipeline (politeness delays, backoff, cooldowns, batch
//! polling) goes through [`Clock`], so tests can drive the producer and
//! consumer with [`ManualClock`] instead of real wall-clock sleeps.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The real clock: `Utc::now` and `tokio::time::sleep`.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that never blocks. Sleeping advances `now` by the requested
/// duration and records it.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// All sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Sum of all requested sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
        let mut now = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(5)).await;
        clock.sleep(Duration::from_millis(1500)).await;

        assert_eq!(clock.now().timestamp(), 1_700_000_006);
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(clock.total_slept(), Duration::from_millis(6500));
    }
}
