//! Scheduler type definitions.
//!
//! Error types, the per-tick run record, and the commands a
//! [`RunnerHandle`](super::RunnerHandle) sends to a running loop.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::run::RunStatus;
use crate::core::schedule::ScheduleError;
use crate::core::types::{PipelineId, RunId};
use crate::execution::RunError;
use crate::pipeline::PipelineOutcome;

/// Errors that can occur in the schedule runner.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The pipeline has no schedule to follow.
    #[error("pipeline '{0}' has no schedule")]
    NotScheduled(PipelineId),

    /// The schedule could not produce a next tick.
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// A run could not be started.
    #[error("run error: {0}")]
    Run(#[from] RunError),

    /// The runner loop is gone.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A schedule tick.
    Scheduled,
    /// A manual trigger through the handle.
    Manual,
}

/// One run performed by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRun {
    /// The tick the run stands for. Manual runs use the trigger time.
    pub tick: DateTime<Utc>,
    pub trigger: Trigger,
    pub run_id: RunId,
    pub status: RunStatus,
}

/// Everything the runner did before it stopped.
#[derive(Debug, Clone, Default)]
pub struct RunnerSummary {
    pub runs: Vec<TickRun>,
    /// Every tick up to and including this one has been handled; pass it to
    /// [`ScheduleRunner::with_start_after`](super::ScheduleRunner::with_start_after)
    /// to resume without losing ticks.
    pub resume_after: Option<DateTime<Utc>>,
}

impl RunnerSummary {
    /// Ticks of scheduled runs, oldest first.
    pub fn scheduled_ticks(&self) -> Vec<DateTime<Utc>> {
        self.runs
            .iter()
            .filter(|r| r.trigger == Trigger::Scheduled)
            .map(|r| r.tick)
            .collect()
    }
}

/// Commands that can be sent to the runner loop.
pub(crate) enum RunnerCommand {
    /// Run the pipeline now.
    Trigger {
        response: oneshot::Sender<Result<PipelineOutcome, SchedulerError>>,
    },
}
