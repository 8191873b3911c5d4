//! Tick loop that runs a pipeline on its schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::schedule::{Schedule, ScheduleError};
use crate::execution::DagExecutor;
use crate::pipeline::{Pipeline, PipelineOutcome};

use super::handle::{COMMAND_CHANNEL_BUFFER, RunnerHandle};
use super::types::{RunnerCommand, RunnerSummary, SchedulerError, TickRun, Trigger};

/// Upper bound on missed ticks collected in one pass.
pub const MAX_MISSED_TICKS: usize = 100;

/// Runs a pipeline once per schedule tick until shut down.
///
/// Time comes from the executor's clock, so a
/// [`ManualClock`](crate::testing::ManualClock) drives the loop without real
/// sleeps. When runs take longer than the tick spacing, the ticks that passed
/// in the meantime are either all run in order (`catchup`) or collapsed into
/// a single run for the latest one.
pub struct ScheduleRunner {
    pipeline: Arc<Pipeline>,
    schedule: Schedule,
    executor: DagExecutor,
    run_limit: Option<usize>,
    start_after: Option<DateTime<Utc>>,
}

impl ScheduleRunner {
    /// Create a runner for a scheduled pipeline.
    pub fn new(pipeline: Arc<Pipeline>, executor: DagExecutor) -> Result<Self, SchedulerError> {
        let schedule = pipeline
            .schedule()
            .cloned()
            .ok_or_else(|| SchedulerError::NotScheduled(pipeline.id().clone()))?;

        Ok(Self {
            pipeline,
            schedule,
            executor,
            run_limit: None,
            start_after: None,
        })
    }

    /// Stop after `limit` scheduled runs.
    pub fn with_run_limit(mut self, limit: usize) -> Self {
        self.run_limit = Some(limit);
        self
    }

    /// Only run ticks strictly after `tick` instead of after "now".
    pub fn with_start_after(mut self, tick: DateTime<Utc>) -> Self {
        self.start_after = Some(tick);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Spawn the loop and return a handle for triggering and shutdown.
    pub fn start(
        self,
        shutdown: CancellationToken,
    ) -> (RunnerHandle, JoinHandle<Result<RunnerSummary, SchedulerError>>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let handle = RunnerHandle {
            command_tx,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(async move { self.run_loop(command_rx, shutdown).await });

        (handle, task)
    }

    /// Run the loop on the current task until `shutdown` fires or the run
    /// limit is reached.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunnerSummary, SchedulerError> {
        let (_command_tx, command_rx) = mpsc::channel(1);
        self.run_loop(command_rx, shutdown).await
    }

    async fn run_loop(
        self,
        command_rx: mpsc::Receiver<RunnerCommand>,
        shutdown: CancellationToken,
    ) -> Result<RunnerSummary, SchedulerError> {
        let span = info_span!(
            "schedule_runner",
            pipeline = %self.pipeline.id(),
            schedule = %self.schedule,
            catchup = self.pipeline.catchup(),
        );
        self.drive(command_rx, shutdown).instrument(span).await
    }

    async fn drive(
        &self,
        mut command_rx: mpsc::Receiver<RunnerCommand>,
        shutdown: CancellationToken,
    ) -> Result<RunnerSummary, SchedulerError> {
        let clock = Arc::clone(self.executor.task_executor().clock());
        let mut summary = RunnerSummary::default();
        let mut scheduled = 0usize;
        let mut cursor = self.start_after.unwrap_or_else(|| clock.timestamp());

        info!("schedule runner started");

        loop {
            if self.limit_reached(scheduled) {
                info!(runs = scheduled, "run limit reached");
                break;
            }

            let next = match self.schedule.next_after(cursor) {
                Ok(next) => next,
                Err(ScheduleError::NoMoreOccurrences) => {
                    info!("schedule has no more occurrences");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let wait = (next - clock.timestamp()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, wait_ms = wait.as_millis() as u64, "waiting for next tick");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = command_rx.recv() => {
                    match command {
                        RunnerCommand::Trigger { response } => {
                            let result = self
                                .execute(clock.timestamp(), Trigger::Manual, &shutdown, &mut summary)
                                .await;
                            let _ = response.send(result);
                        }
                    }
                    continue;
                }
                _ = clock.sleep(wait) => {}
            }

            let now = clock.timestamp();
            let due = self.schedule.ticks_between(cursor, now, MAX_MISSED_TICKS);
            let Some(&latest) = due.last() else {
                continue;
            };

            let ticks = if self.pipeline.catchup() {
                if due.len() > 1 {
                    info!(missed = due.len() - 1, "catching up on missed ticks");
                }
                due
            } else {
                if due.len() >= MAX_MISSED_TICKS {
                    warn!(
                        now = %now,
                        missed_occurrences = %format!("{}+", due.len()),
                        "Many scheduled occurrences missed ({}+), triggering once",
                        MAX_MISSED_TICKS
                    );
                    cursor = now;
                } else {
                    if due.len() > 1 {
                        warn!(
                            now = %now,
                            missed_occurrences = due.len(),
                            "Multiple scheduled occurrences missed, triggering once"
                        );
                    }
                    cursor = latest;
                }
                vec![latest]
            };

            for tick in ticks {
                if shutdown.is_cancelled() || self.limit_reached(scheduled) {
                    break;
                }
                self.execute(tick, Trigger::Scheduled, &shutdown, &mut summary)
                    .await?;
                scheduled += 1;
                cursor = cursor.max(tick);
            }
        }

        summary.resume_after = Some(cursor);
        info!(runs = summary.runs.len(), resume_after = %cursor, "schedule runner stopped");
        Ok(summary)
    }

    fn limit_reached(&self, scheduled: usize) -> bool {
        self.run_limit.is_some_and(|limit| scheduled >= limit)
    }

    async fn execute(
        &self,
        tick: DateTime<Utc>,
        trigger: Trigger,
        shutdown: &CancellationToken,
        summary: &mut RunnerSummary,
    ) -> Result<PipelineOutcome, SchedulerError> {
        info!(tick = %tick, ?trigger, "triggering pipeline");
        let outcome = self
            .pipeline
            .run_once(&self.executor, shutdown.child_token())
            .await?;

        summary.runs.push(TickRun {
            tick,
            trigger,
            run_id: outcome.run.run_id,
            status: outcome.run.status,
        });
        Ok(outcome)
    }
}
