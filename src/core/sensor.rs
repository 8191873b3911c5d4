//! Polling readiness sensors.
//!
//! A [`Sensor`] repeatedly invokes a [`ReadinessCheck`] every
//! `poll_interval` until it reports ready or `timeout` has elapsed. Errors
//! from the check count as "not ready yet"; the deadline keeps running.
//!
//! Polls only happen strictly before the deadline and the last sleep is
//! clamped to the remaining time, so a sensor that never becomes ready
//! finishes with `timeout <= elapsed < timeout + poll_interval`. When
//! `timeout == poll_interval` exactly one poll is made.
//!
//! A check still running when the deadline passes is dropped and the sensor
//! times out, so a slow or hung check cannot hold the task past `timeout`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::clock::Clock;
use super::task::TaskError;

/// Invalid sensor timing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// Poll interval must be positive.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    /// Timeout must be at least one poll interval.
    #[error("timeout {timeout:?} is shorter than poll interval {poll_interval:?}")]
    TimeoutShorterThanInterval {
        poll_interval: Duration,
        timeout: Duration,
    },
}

/// External readiness predicate polled by a sensor.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Returns `Ok(true)` when the condition holds.
    ///
    /// `Ok(false)` and `Err(_)` both mean "not ready yet".
    async fn check(&self) -> Result<bool, TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<String> {
        None
    }
}

/// Poll interval and deadline of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPolicy {
    poll_interval: Duration,
    timeout: Duration,
}

impl SensorPolicy {
    /// Validate and build a policy.
    pub fn new(poll_interval: Duration, timeout: Duration) -> Result<Self, SensorError> {
        if poll_interval.is_zero() {
            return Err(SensorError::ZeroPollInterval);
        }
        if timeout < poll_interval {
            return Err(SensorError::TimeoutShorterThanInterval {
                poll_interval,
                timeout,
            });
        }
        Ok(Self {
            poll_interval,
            timeout,
        })
    }

    /// Spacing between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Deadline measured from the first poll.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// How a sensor wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorOutcome {
    /// The check reported ready.
    Ready { polls: u32, elapsed: Duration },
    /// The deadline passed without the check reporting ready.
    TimedOut { polls: u32, elapsed: Duration },
    /// The run was cancelled while waiting.
    Cancelled { polls: u32, elapsed: Duration },
}

impl SensorOutcome {
    /// Number of times the check was invoked.
    pub fn polls(&self) -> u32 {
        match self {
            SensorOutcome::Ready { polls, .. }
            | SensorOutcome::TimedOut { polls, .. }
            | SensorOutcome::Cancelled { polls, .. } => *polls,
        }
    }

    /// Time spent waiting.
    pub fn elapsed(&self) -> Duration {
        match self {
            SensorOutcome::Ready { elapsed, .. }
            | SensorOutcome::TimedOut { elapsed, .. }
            | SensorOutcome::Cancelled { elapsed, .. } => *elapsed,
        }
    }

    /// Whether the sensor reported ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, SensorOutcome::Ready { .. })
    }

    /// Convert into the task-level result: ready is success, anything else
    /// is a terminal failure.
    pub fn into_result(self) -> Result<(), TaskError> {
        match self {
            SensorOutcome::Ready { .. } => Ok(()),
            SensorOutcome::TimedOut { polls, elapsed } => {
                Err(TaskError::SensorTimedOut { elapsed, polls })
            }
            SensorOutcome::Cancelled { .. } => Err(TaskError::Cancelled),
        }
    }
}

/// A readiness check paired with its polling policy.
#[derive(Clone)]
pub struct Sensor {
    check: Arc<dyn ReadinessCheck>,
    policy: SensorPolicy,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("check", &self.check.description())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Sensor {
    /// Create a sensor from a check and a validated policy.
    pub fn new(check: Arc<dyn ReadinessCheck>, policy: SensorPolicy) -> Self {
        Self { check, policy }
    }

    /// The polling policy.
    pub fn policy(&self) -> SensorPolicy {
        self.policy
    }

    /// Description of the underlying check.
    pub fn description(&self) -> Option<String> {
        self.check.description()
    }

    /// Poll until ready, timed out, or cancelled.
    pub async fn wait(&self, clock: &dyn Clock, cancel: &CancellationToken) -> SensorOutcome {
        let start = clock.now();
        let timeout = self.policy.timeout;
        let deadline = start + timeout;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return SensorOutcome::Cancelled {
                    polls,
                    elapsed: clock.now() - start,
                };
            }

            polls += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return SensorOutcome::Cancelled {
                        polls,
                        elapsed: clock.now() - start,
                    };
                }
                _ = clock.sleep_until(deadline) => {
                    let elapsed = clock.now() - start;
                    debug!(
                        polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "sensor check outlived deadline"
                    );
                    return SensorOutcome::TimedOut { polls, elapsed };
                }
                result = self.check.check() => result,
            };

            match result {
                Ok(true) => {
                    let elapsed = clock.now() - start;
                    debug!(polls, elapsed_ms = elapsed.as_millis() as u64, "sensor ready");
                    return SensorOutcome::Ready { polls, elapsed };
                }
                Ok(false) => debug!(polls, "sensor not ready"),
                Err(e) => debug!(polls, error = %e, "sensor check failed, treating as not ready"),
            }

            let elapsed = clock.now() - start;
            if elapsed >= timeout {
                return SensorOutcome::TimedOut { polls, elapsed };
            }

            let pause = self.policy.poll_interval.min(timeout - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return SensorOutcome::Cancelled {
                        polls,
                        elapsed: clock.now() - start,
                    };
                }
                _ = clock.sleep(pause) => {}
            }

            let elapsed = clock.now() - start;
            if elapsed >= timeout {
                return SensorOutcome::TimedOut { polls, elapsed };
            }
        }
    }
}

/// Free-function form of [`Sensor::wait`].
pub async fn wait(
    check: Arc<dyn ReadinessCheck>,
    poll_interval: Duration,
    timeout: Duration,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<SensorOutcome, SensorError> {
    let policy = SensorPolicy::new(poll_interval, timeout)?;
    Ok(Sensor::new(check, policy).wait(clock, cancel).await)
}
