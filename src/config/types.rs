//! Configuration type definitions.
//!
//! This module contains the type definitions for YAML pipeline definitions
//! including tasks, schedules, retry policies and notification channels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default sensor poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default sensor timeout in seconds (seven days).
pub const DEFAULT_SENSOR_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Pipeline configuration from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline identifier.
    pub id: String,
    /// Human-readable name. Defaults to the id.
    pub name: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Schedule expression (cron or shortcut).
    pub schedule: Option<ScheduleConfig>,
    /// Run every missed tick instead of only the latest.
    #[serde(default)]
    pub catchup: bool,
    /// Maximum number of tasks in flight.
    pub concurrency_limit: Option<usize>,
    /// Retry policy for tasks without their own.
    pub default_retry: Option<RetryConfig>,
    /// Task definitions, in declaration order.
    pub tasks: Vec<TaskConfig>,
    /// Channels notified after every run, in order.
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

impl PipelineConfig {
    /// The configured name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    /// Simple cron expression string.
    Simple(String),
    /// Detailed schedule with timezone.
    Detailed {
        /// Cron expression or shortcut.
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
    },
}

impl ScheduleConfig {
    /// Get the cron expression.
    pub fn cron(&self) -> &str {
        match self {
            ScheduleConfig::Simple(s) => s,
            ScheduleConfig::Detailed { cron, .. } => cron,
        }
    }

    /// Get the timezone, if specified.
    pub fn timezone(&self) -> Option<&str> {
        match self {
            ScheduleConfig::Simple(_) => None,
            ScheduleConfig::Detailed { timezone, .. } => timezone.as_deref(),
        }
    }
}

/// Task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the pipeline).
    pub id: String,
    /// Task type and configuration.
    #[serde(flatten)]
    pub task_type: TaskTypeConfig,
    /// Tasks that must succeed before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Retry policy for this task, overriding `default_retry`.
    pub retry: Option<RetryConfig>,
    /// Failure of this task does not fail the run.
    #[serde(default)]
    pub best_effort: bool,
}

/// Task type configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskTypeConfig {
    /// Poll a URL until it answers with a success status.
    HttpSensor {
        url: String,
        /// Substring the response body must contain.
        contains: Option<String>,
        #[serde(default = "default_poll_interval")]
        poll_interval_secs: u64,
        #[serde(default = "default_sensor_timeout")]
        timeout_secs: u64,
        /// Per-request timeout.
        request_timeout_secs: Option<u64>,
    },
    /// Poll until a path exists.
    FileSensor {
        path: String,
        #[serde(default = "default_poll_interval")]
        poll_interval_secs: u64,
        #[serde(default = "default_sensor_timeout")]
        timeout_secs: u64,
    },
    /// Run an external program, or a script through `sh -c`.
    Command {
        /// Program to run. Exclusive with `script`.
        command: Option<String>,
        /// Shell script. Exclusive with `command`.
        script: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        working_dir: Option<String>,
        timeout_secs: Option<u64>,
    },
}

impl TaskTypeConfig {
    /// The `type` tag as written in YAML.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskTypeConfig::HttpSensor { .. } => "http_sensor",
            TaskTypeConfig::FileSensor { .. } => "file_sensor",
            TaskTypeConfig::Command { .. } => "command",
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_sensor_timeout() -> u64 {
    DEFAULT_SENSOR_TIMEOUT_SECS
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry in seconds.
    pub delay_secs: u64,
    /// Delay growth between retries.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Retry condition.
    #[serde(default)]
    pub condition: RetryConditionConfig,
}

/// Backoff configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay multiplied after every retry.
    Exponential {
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        max_delay_secs: Option<u64>,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

/// Retry condition configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryConditionConfig {
    /// Always retry on failure.
    #[default]
    Always,
    /// Only retry on transient errors.
    TransientOnly,
    /// Never retry.
    Never,
}

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationConfig {
    /// Chat webhook receiving a JSON payload.
    Webhook {
        name: Option<String>,
        url: String,
        /// Message template for the `text` field.
        message: Option<String>,
        username: Option<String>,
        timeout_secs: Option<u64>,
    },
    /// Mail piped to a program, `sendmail -t` unless `command` is given.
    Email {
        name: Option<String>,
        to: Vec<String>,
        subject: Option<String>,
        body: Option<String>,
        /// Program and arguments receiving the message on stdin.
        command: Option<Vec<String>>,
        /// Seconds before the program is killed and the delivery fails.
        timeout_secs: Option<u64>,
    },
    /// Message written to the log.
    Log {
        name: Option<String>,
        subject: Option<String>,
        body: Option<String>,
    },
}

impl NotificationConfig {
    /// Channel name: the configured one, or the type tag.
    pub fn name(&self) -> &str {
        match self {
            NotificationConfig::Webhook { name, .. } => name.as_deref().unwrap_or("webhook"),
            NotificationConfig::Email { name, .. } => name.as_deref().unwrap_or("email"),
            NotificationConfig::Log { name, .. } => name.as_deref().unwrap_or("log"),
        }
    }
}
