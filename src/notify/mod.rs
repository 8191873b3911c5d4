//! Completion notifications.
//!
//! Once a graph run is terminal, a [`NotificationFanout`] sends one
//! [`Notification`] to each configured channel in declaration order. A
//! failing channel is logged and skipped over; it never changes the outcome
//! of the run. Every send is bounded by the channel's
//! [`timeout`](NotificationChannel::timeout); a channel that does not answer
//! in time is reported as a failed delivery.

mod template;
mod webhook;

pub use template::{CommandTransport, LogTransport, Message, MessageTransport, TemplateChannel, render};
pub use webhook::WebhookChannel;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::run::{FailureKind, GraphRun, RunStatus, TaskState};
use crate::core::types::{PipelineId, RunId, TaskId};

/// Send timeout for channels that do not configure one.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by a notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP request could not be sent.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The delivery program could not be started or written to.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The delivery program exited unsuccessfully.
    #[error("'{program}' exited with {code:?}: {stderr}")]
    Command {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The channel did not finish within its send timeout.
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    /// Any other delivery failure.
    #[error("{0}")]
    Other(String),
}

/// A task that did not succeed, as reported in a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub task_id: TaskId,
    pub state: TaskState,
    pub kind: Option<FailureKind>,
    pub message: Option<String>,
}

/// Summary of a finished run handed to every channel.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub pipeline_id: PipelineId,
    pub run_id: RunId,
    pub status: RunStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<FailedTask>,
}

impl Notification {
    /// Summarise a graph run.
    pub fn from_run(run: &GraphRun) -> Self {
        let failures = run
            .tasks
            .iter()
            .filter(|t| t.state() != TaskState::Succeeded)
            .map(|t| FailedTask {
                task_id: t.task_id().clone(),
                state: t.state(),
                kind: t.error().map(|e| e.kind),
                message: t.error().map(|e| e.message.clone()),
            })
            .collect();

        Self {
            pipeline_id: run.pipeline_id.clone(),
            run_id: run.run_id,
            status: run.status,
            cancelled: run.cancelled,
            started_at: run.started_at,
            ended_at: run.ended_at,
            succeeded: run.count(TaskState::Succeeded),
            failed: run.count(TaskState::Failed),
            skipped: run.count(TaskState::Skipped),
            failures,
        }
    }

    /// Wall time of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    /// Comma separated names of the tasks that did not succeed, or `none`.
    pub fn failed_task_names(&self) -> String {
        if self.failures.is_empty() {
            return "none".to_string();
        }
        self.failures
            .iter()
            .map(|f| f.task_id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A destination for completion notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name used in logs and delivery reports.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Upper bound on one `send`.
    fn timeout(&self) -> Duration {
        DEFAULT_SEND_TIMEOUT
    }
}

/// Outcome of sending to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    /// `None` when delivered, otherwise the error message.
    pub error: Option<String>,
}

impl Delivery {
    /// Whether the channel accepted the notification.
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-channel results of one fan-out, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub deliveries: Vec<Delivery>,
}

impl DeliveryReport {
    /// Whether every channel accepted the notification.
    pub fn all_delivered(&self) -> bool {
        self.deliveries.iter().all(Delivery::is_delivered)
    }

    /// Deliveries that failed.
    pub fn failures(&self) -> impl Iterator<Item = &Delivery> {
        self.deliveries.iter().filter(|d| !d.is_delivered())
    }
}

/// Ordered list of channels notified after every run.
#[derive(Clone, Default)]
pub struct NotificationFanout {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationFanout {
    /// Create a fan-out with no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append a channel.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Append a channel.
    pub fn push(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.push(channel);
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are configured.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel names in declaration order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Send the run summary to every channel.
    pub async fn notify(&self, run: &GraphRun) -> DeliveryReport {
        notify(&self.channels, run).await
    }
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("channels", &self.channel_names())
            .finish()
    }
}

/// Send the summary of `run` to `channels` sequentially, in order.
pub async fn notify(channels: &[Arc<dyn NotificationChannel>], run: &GraphRun) -> DeliveryReport {
    let notification = Notification::from_run(run);
    let mut report = DeliveryReport::default();

    for channel in channels {
        let limit = channel.timeout();
        let sent = tokio::time::timeout(limit, channel.send(&notification))
            .await
            .unwrap_or(Err(NotifyError::Timeout(limit)));
        let error = match sent {
            Ok(()) => {
                info!(channel = channel.name(), run_id = %run.run_id, "notification sent");
                None
            }
            Err(e) => {
                warn!(
                    channel = channel.name(),
                    run_id = %run.run_id,
                    error = %e,
                    "notification failed"
                );
                Some(e.to_string())
            }
        };
        report.deliveries.push(Delivery {
            channel: channel.name().to_string(),
            error,
        });
    }

    report
}
