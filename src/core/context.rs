//! Per-attempt execution context handed to actions.
//!
//! A [`TaskContext`] tells an action which task and run it belongs to, which
//! attempt is in progress, and carries the run's cancellation token so long
//! running work can stop early when the run is aborted.

use tokio_util::sync::CancellationToken;

use super::types::{PipelineId, RunId, TaskId};

/// Context for one attempt of one task.
///
/// Cheap to clone; the cancellation token is shared with the run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    pipeline_id: PipelineId,
    run_id: RunId,
    attempt: u32,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Create a context for the first attempt of a task within a run.
    pub fn new(
        task_id: TaskId,
        pipeline_id: PipelineId,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            pipeline_id,
            run_id,
            attempt: 1,
            cancel,
        }
    }

    /// Create a context outside of any engine run (tests, ad-hoc invocation).
    pub fn detached(task_id: impl Into<TaskId>) -> Self {
        Self::new(
            task_id.into(),
            PipelineId::new("adhoc"),
            RunId::new(),
            CancellationToken::new(),
        )
    }

    /// Builder: set the attempt number (1-indexed).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The task being executed.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The pipeline the run belongs to.
    pub fn pipeline_id(&self) -> &PipelineId {
        &self.pipeline_id
    }

    /// The graph run this attempt is part of.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Current attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token cancelled when the run is aborted.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
