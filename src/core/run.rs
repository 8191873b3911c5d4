//! Per-task execution records.
//!
//! A [`TaskRun`] tracks one task through one graph run. State changes go
//! through [`TaskRun::transition`], which rejects moves the state machine
//! does not allow and timestamps every accepted move:
//!
//! ```text
//! Pending ──► Running ──► Succeeded
//!    │          │  ▲
//!    │          ▼  │
//!    │        Retrying
//!    │          │
//!    │          ▼
//!    │        Failed        (Running ──► Failed, Retrying ──► Failed on cancel)
//!    ▼
//! Skipped
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::task::TaskError;
use super::types::{PipelineId, RunId, TaskId};

/// Lifecycle state of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dependencies.
    Pending,
    /// An attempt is executing (or a sensor is polling).
    Running,
    /// Waiting out the backoff delay before the next attempt.
    Retrying,
    /// Finished successfully.
    Succeeded,
    /// Exhausted its retries, timed out as a sensor, or was cancelled.
    Failed,
    /// Never ran because an upstream task did not succeed.
    Skipped,
}

impl TaskState {
    /// Whether the state is final for this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }

    /// Whether a move from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Running, Succeeded)
                | (Running, Retrying)
                | (Running, Failed)
                | (Retrying, Running)
                | (Retrying, Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task '{task}': invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub task: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}

/// Category of a captured task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work function returned an error on its final attempt.
    Error,
    /// A sensor's deadline passed.
    SensorTimeout,
    /// The run was cancelled while the task was in flight or waiting.
    Cancelled,
    /// An upstream task failed or was skipped.
    UpstreamFailed,
}

/// Captured cause of a non-successful task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    /// Classify a task error.
    pub fn from_error(error: &TaskError) -> Self {
        let kind = match error {
            TaskError::SensorTimedOut { .. } => FailureKind::SensorTimeout,
            TaskError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Error,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }

    /// Failure recorded on a task skipped because of `upstream`.
    pub fn upstream(upstream: &[TaskId]) -> Self {
        let names: Vec<&str> = upstream.iter().map(|id| id.as_str()).collect();
        Self {
            kind: FailureKind::UpstreamFailed,
            message: format!("upstream did not succeed: {}", names.join(", ")),
        }
    }

    /// Failure recorded on a task that never started because the run was cancelled.
    pub fn cancelled_before_start() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "run cancelled before task started".to_string(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One accepted state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

/// Execution record of one task within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    task_id: TaskId,
    state: TaskState,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<TaskFailure>,
    transitions: Vec<Transition>,
}

impl TaskRun {
    /// Create a pending record.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            error: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `to` at time `at`.
    ///
    /// Entering `Running` counts an attempt. The first `Running` sets
    /// `started_at`; entering a terminal state sets `ended_at`.
    pub fn transition(&mut self, to: TaskState, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                task: self.task_id.clone(),
                from: self.state,
                to,
            });
        }

        if to == TaskState::Running {
            self.attempts += 1;
            self.started_at.get_or_insert(at);
        }
        if to.is_terminal() {
            self.ended_at = Some(at);
        }

        self.transitions.push(Transition {
            from: self.state,
            to,
            at,
        });
        self.state = to;
        Ok(())
    }

    /// Terminal failure with a captured cause.
    pub fn fail(&mut self, failure: TaskFailure, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskState::Failed, at)?;
        self.error = Some(failure);
        Ok(())
    }

    /// Skip with a captured cause.
    pub fn skip(&mut self, cause: TaskFailure, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskState::Skipped, at)?;
        self.error = Some(cause);
        Ok(())
    }

    /// The task this record belongs to.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of times the task entered `Running`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the first attempt started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the task reached a terminal state.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Captured failure, if any.
    pub fn error(&self) -> Option<&TaskFailure> {
        self.error.as_ref()
    }

    /// Every accepted transition, oldest first.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Wall time between first start and end.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

/// Aggregate outcome of a graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("SUCCESS"),
            RunStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Report of one graph run: every task record plus the aggregate status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRun {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Task records in graph insertion order.
    pub tasks: Vec<TaskRun>,
}

impl GraphRun {
    /// Whether the run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Record of a single task.
    pub fn task(&self, id: &TaskId) -> Option<&TaskRun> {
        self.tasks.iter().find(|t| &t.task_id == id)
    }

    /// State of a single task.
    pub fn state_of(&self, id: &TaskId) -> Option<TaskState> {
        self.task(id).map(|t| t.state)
    }

    /// Tasks that did not succeed, with their causes.
    pub fn failures(&self) -> Vec<(&TaskId, Option<&TaskFailure>)> {
        self.tasks
            .iter()
            .filter(|t| t.state != TaskState::Succeeded)
            .map(|t| (&t.task_id, t.error.as_ref()))
            .collect()
    }

    /// Number of tasks in `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Wall time of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}
