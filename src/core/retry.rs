//! Retry policy configuration for tasks.
//!
//! A policy carries the retry budget (retries after the first attempt), the
//! base backoff delay, how the delay grows between retries, and which errors
//! are eligible for a retry at all.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::TaskError;

/// Retry policy for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries, not including the initial attempt (0 = no retries).
    /// `max_attempts = 1` means up to 2 executions in total.
    pub max_attempts: u32,

    /// Base delay before the first retry.
    #[serde(with = "serde_millis")]
    pub delay: Duration,

    /// How the delay evolves across retries.
    #[serde(default)]
    pub backoff: Backoff,

    /// Condition for when to retry.
    #[serde(default)]
    pub retry_on: RetryCondition,
}

/// Delay growth between consecutive retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,

    /// Delay multiplied by `multiplier` after each retry, optionally capped.
    Exponential {
        multiplier: f64,
        #[serde(default, with = "serde_millis_opt")]
        max_delay: Option<Duration>,
    },
}

/// Conditions under which a task should be retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCondition {
    /// Retry on any error.
    #[default]
    Always,

    /// Retry only on transient errors (timeouts, resource unavailable).
    TransientOnly,

    /// Never retry, regardless of max_attempts.
    Never,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            retry_on: RetryCondition::Never,
        }
    }

    /// Create a policy with fixed delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
            retry_on: RetryCondition::Always,
        }
    }

    /// Create a policy whose delay doubles after each retry.
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: initial_delay,
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_delay: None,
            },
            retry_on: RetryCondition::Always,
        }
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Builder: set the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0 && self.retry_on != RetryCondition::Never
    }

    /// Total number of executions the policy allows.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// `attempts` is the number of executions made so far, including the one
    /// that just failed.
    pub fn should_retry(&self, attempts: u32, error: &TaskError) -> bool {
        if attempts > self.max_attempts {
            return false;
        }
        match self.retry_on {
            RetryCondition::Always => !matches!(error, TaskError::Cancelled),
            RetryCondition::TransientOnly => error.is_transient(),
            RetryCondition::Never => false,
        }
    }

    /// Delay to wait before retry number `retry` (1 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let nanos = self.delay.as_nanos() as f64 * multiplier.max(1.0).powi(exponent);
                let delay = Duration::from_nanos(nanos.min(u64::MAX as f64) as u64);
                match max_delay {
                    Some(cap) => delay.min(cap),
                    None => delay,
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod serde_millis_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> TaskError {
        TaskError::ExecutionFailed("boom".into())
    }

    #[test]
    fn test_default_policy_has_no_retries() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.total_attempts(), 1);
        assert!(!policy.is_enabled());
        assert!(!policy.should_retry(1, &failure()));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        // retries=1, retry_delay=5m
        let policy = RetryPolicy::fixed(1, Duration::from_secs(300));

        assert!(policy.should_retry(1, &failure()));
        assert!(!policy.should_retry(2, &failure()));
        assert_eq!(policy.total_attempts(), 2);
    }

    #[test]
    fn test_transient_only_filters_errors() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10))
            .with_condition(RetryCondition::TransientOnly);

        assert!(policy.should_retry(1, &TaskError::Transient("503".into())));
        assert!(!policy.should_retry(1, &failure()));
    }

    #[test]
    fn test_never_condition_disables_retries() {
        let policy =
            RetryPolicy::fixed(5, Duration::from_secs(1)).with_condition(RetryCondition::Never);

        assert!(!policy.is_enabled());
        assert!(!policy.should_retry(1, &failure()));
    }

    #[test]
    fn test_cancellation_is_never_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert!(!policy.should_retry(1, &TaskError::Cancelled));
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_delay_grows_and_caps() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100)).with_backoff(
            Backoff::Exponential {
                multiplier: 2.0,
                max_delay: Some(Duration::from_millis(350)),
            },
        );

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_policy_serialization() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(250));
        let json = serde_json::to_string(&policy).expect("serialize");
        let deserialized: RetryPolicy = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(policy, deserialized);
    }
}
