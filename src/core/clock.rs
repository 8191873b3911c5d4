//! Time source used by sensors and retry backoff.
//!
//! Production code uses [`TokioClock`]. Tests substitute
//! [`ManualClock`](crate::testing::ManualClock), whose `sleep` advances
//! virtual time instantly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Injectable clock.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic "now" used for elapsed-time measurements.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Suspend the calling task until `now() >= deadline`.
    async fn sleep_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(self.now());
        if !remaining.is_zero() {
            self.sleep(remaining).await;
        }
    }

    /// Wall-clock timestamp used for run records.
    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline.into()).await;
    }
}
