//! Single-task execution.
//!
//! The `TaskExecutor` drives one [`TaskNode`] from PENDING to a terminal
//! state:
//! - sensors poll their readiness check until ready, timed out, or cancelled
//! - actions run once per attempt and are retried according to the node's
//!   [`RetryPolicy`](crate::core::retry::RetryPolicy)
//! - every state change is recorded on the returned [`TaskRun`]

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, TokioClock};
use crate::core::context::TaskContext;
use crate::core::dag::{TaskKind, TaskNode};
use crate::core::run::{TaskFailure, TaskRun, TaskState, TransitionError};
use crate::core::task::TaskError;
use crate::events::{Event, EventBus};

/// Runs individual tasks with retry, backoff and cancellation.
#[derive(Clone)]
pub struct TaskExecutor {
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskExecutor {
    /// Create an executor using the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            event_bus: None,
        }
    }

    /// Builder: emit lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// The clock used for sensor polling and backoff.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The event bus, if any.
    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event.at(self.clock.now())).await;
        }
    }

    /// Execute `node` to a terminal state and return its record.
    ///
    /// The returned record is SUCCEEDED or FAILED. A cancelled run fails the
    /// task with a cancellation cause.
    pub async fn execute(&self, node: &TaskNode, ctx: TaskContext) -> Result<TaskRun, TransitionError> {
        let mut run = TaskRun::new(node.id.clone());
        let mut ctx = ctx;
        let cancel = ctx.cancellation().clone();
        let start = self.clock.now();
        let run_id = ctx.run_id();
        let max_attempts = if node.is_sensor() {
            1
        } else {
            node.retry.total_attempts()
        };

        loop {
            run.transition(TaskState::Running, self.clock.timestamp())?;
            let attempt = run.attempts();
            ctx = ctx.with_attempt(attempt);

            debug!(task = %node.id, attempt, max_attempts, "starting attempt");
            self.emit(Event::task_started(node.id.clone(), run_id, attempt))
                .await;

            let error = match self.attempt(node, &ctx, &cancel).await {
                Ok(()) => {
                    run.transition(TaskState::Succeeded, self.clock.timestamp())?;
                    let duration = self.clock.now().saturating_duration_since(start);
                    info!(
                        task = %node.id,
                        attempts = attempt,
                        duration_ms = duration.as_millis() as u64,
                        "task succeeded"
                    );
                    self.emit(Event::task_succeeded(node.id.clone(), run_id, attempt, duration))
                        .await;
                    return Ok(run);
                }
                Err(error) => error,
            };

            // Sensor timeouts and cancellations never consume the retry budget.
            let retryable = !node.is_sensor()
                && !cancel.is_cancelled()
                && node.retry.should_retry(attempt, &error);

            if !retryable {
                return self.finish_failed(node, run, &ctx, &error).await;
            }

            let delay = node.retry.delay_for(attempt);
            run.transition(TaskState::Retrying, self.clock.timestamp())?;
            warn!(
                task = %node.id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            self.emit(Event::task_retrying(
                node.id.clone(),
                run_id,
                attempt,
                max_attempts,
                delay,
                error.to_string(),
            ))
            .await;

            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = self.clock.sleep(delay) => false,
            };
            if cancelled {
                return self.finish_failed(node, run, &ctx, &TaskError::Cancelled).await;
            }
        }
    }

    async fn attempt(
        &self,
        node: &TaskNode,
        ctx: &TaskContext,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        match &node.kind {
            TaskKind::Sensor(sensor) => {
                let outcome = sensor.wait(self.clock.as_ref(), cancel).await;
                debug!(
                    task = %node.id,
                    polls = outcome.polls(),
                    elapsed_ms = outcome.elapsed().as_millis() as u64,
                    ready = outcome.is_ready(),
                    "sensor finished"
                );
                outcome.into_result()
            }
            TaskKind::Action(action) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TaskError::Cancelled),
                    result = action.execute(ctx) => result,
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        node: &TaskNode,
        mut run: TaskRun,
        ctx: &TaskContext,
        error: &TaskError,
    ) -> Result<TaskRun, TransitionError> {
        let failure = TaskFailure::from_error(error);
        run.fail(failure.clone(), self.clock.timestamp())?;
        warn!(
            task = %node.id,
            attempts = run.attempts(),
            error = %error,
            "task failed"
        );
        self.emit(Event::task_failed(
            node.id.clone(),
            ctx.run_id(),
            run.attempts(),
            failure,
        ))
        .await;
        Ok(run)
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TokioClock))
    }
}
