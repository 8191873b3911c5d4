//! Graph execution engine.
//!
//! The `DagExecutor` drives a [`TaskGraph`] to completion: it repeatedly asks
//! the graph for its ready set, skips tasks whose upstream failed, launches
//! runnable tasks up to the concurrency limit and waits for one of them to
//! finish. The run table is owned by the engine loop; each launched task works
//! on its own record and hands it back when it is terminal.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::clock::Clock;
use crate::core::context::TaskContext;
use crate::core::dag::{GraphError, TaskGraph};
use crate::core::run::{
    FailureKind, GraphRun, RunStatus, TaskFailure, TaskRun, TaskState, TransitionError,
};
use crate::core::types::{RunId, TaskId};
use crate::events::{Event, EventBus};

use super::executor::TaskExecutor;

/// Errors that prevent a run from starting or completing.
#[derive(Debug, Error)]
pub enum RunError {
    /// The graph failed validation; no task was started.
    #[error("invalid graph: {0}")]
    InvalidGraph(#[from] GraphError),

    /// The concurrency limit must be at least 1.
    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// A task record rejected a state change.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Engine running task graphs.
#[derive(Clone, Default)]
pub struct DagExecutor {
    task_executor: TaskExecutor,
}

impl DagExecutor {
    /// Create an engine around the given task executor.
    pub fn new(task_executor: TaskExecutor) -> Self {
        Self { task_executor }
    }

    /// The underlying task executor.
    pub fn task_executor(&self) -> &TaskExecutor {
        &self.task_executor
    }

    /// Run `graph` to completion with at most `concurrency_limit` tasks in flight.
    ///
    /// Never aborts early: every task ends SUCCEEDED, FAILED or SKIPPED. The
    /// run is SUCCESS when every task not marked best-effort SUCCEEDED.
    pub async fn run(&self, graph: &TaskGraph, concurrency_limit: usize) -> Result<GraphRun, RunError> {
        self.run_with_cancel(graph, concurrency_limit, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), stopping early when `cancel` fires.
    ///
    /// In-flight tasks end FAILED with a cancellation cause; tasks that never
    /// started end SKIPPED.
    pub async fn run_with_cancel(
        &self,
        graph: &TaskGraph,
        concurrency_limit: usize,
        cancel: CancellationToken,
    ) -> Result<GraphRun, RunError> {
        if concurrency_limit == 0 {
            return Err(RunError::InvalidConcurrency(concurrency_limit));
        }
        graph.validate()?;

        let run_id = RunId::new();
        let span = info_span!(
            "graph_run",
            pipeline = %graph.id(),
            run_id = %run_id,
            task_count = graph.len(),
            concurrency_limit,
        );

        self.drive(graph, run_id, concurrency_limit, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        graph: &TaskGraph,
        run_id: RunId,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<GraphRun, RunError> {
        let clock = Arc::clone(self.task_executor.clock());
        let events = self.task_executor.event_bus().cloned();
        let pipeline_id = graph.id().clone();
        let started_at = clock.timestamp();
        let start = clock.now();

        info!("starting graph run");
        emit(&events, clock.as_ref(), Event::run_started(pipeline_id.clone(), run_id)).await;

        let mut runs: HashMap<TaskId, TaskRun> = graph
            .tasks()
            .map(|n| (n.id.clone(), TaskRun::new(n.id.clone())))
            .collect();
        let mut in_flight = JoinSet::new();
        let mut launched: HashMap<tokio::task::Id, TaskId> = HashMap::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                warn!(in_flight = in_flight.len(), "run cancelled");
            }

            if cancelled {
                for node in graph.tasks() {
                    if let Some(run) = runs.get_mut(&node.id)
                        && run.state() == TaskState::Pending
                    {
                        let reason = TaskFailure::cancelled_before_start();
                        run.skip(reason.clone(), clock.timestamp())?;
                        emit(&events, clock.as_ref(), Event::task_skipped(node.id.clone(), run_id, reason)).await;
                    }
                }
            } else {
                // Skipping can expose further skips, so settle them before launching.
                let ready = loop {
                    let ready = graph.ready_set(&runs);
                    if ready.to_skip.is_empty() {
                        break ready;
                    }
                    for (id, blocked) in ready.to_skip {
                        let reason = TaskFailure::upstream(&blocked);
                        if let Some(run) = runs.get_mut(&id) {
                            run.skip(reason.clone(), clock.timestamp())?;
                        }
                        info!(task = %id, reason = %reason, "task skipped");
                        emit(&events, clock.as_ref(), Event::task_skipped(id, run_id, reason)).await;
                    }
                };

                let slots = limit.saturating_sub(in_flight.len());
                for id in ready.runnable.into_iter().take(slots) {
                    let Some(node) = graph.get(&id).cloned() else {
                        continue;
                    };
                    if let Some(run) = runs.get_mut(&id) {
                        run.transition(TaskState::Running, clock.timestamp())?;
                    }

                    debug!(task = %id, kind = node.kind.label(), "dispatching task");
                    let ctx = TaskContext::new(id.clone(), pipeline_id.clone(), run_id, cancel.clone());
                    let executor = self.task_executor.clone();
                    let task_span = info_span!("task", task = %id);
                    let handle = in_flight.spawn(
                        async move { executor.execute(&node, ctx).await }.instrument(task_span),
                    );
                    launched.insert(handle.id(), id);
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => continue,
                joined = in_flight.join_next_with_id() => joined,
            };

            match joined {
                Some(Ok((handle_id, record))) => {
                    launched.remove(&handle_id);
                    let record = record?;
                    runs.insert(record.task_id().clone(), record);
                }
                Some(Err(join_error)) => {
                    let Some(id) = launched.remove(&join_error.id()) else {
                        continue;
                    };
                    warn!(task = %id, error = %join_error, "task aborted");
                    let failure = TaskFailure {
                        kind: FailureKind::Error,
                        message: format!("task aborted: {join_error}"),
                    };
                    if let Some(run) = runs.get_mut(&id) {
                        run.fail(failure.clone(), clock.timestamp())?;
                        emit(
                            &events,
                            clock.as_ref(),
                            Event::task_failed(id.clone(), run_id, run.attempts(), failure),
                        )
                        .await;
                    }
                }
                None => break,
            }
        }

        let status = if graph.tasks().all(|node| {
            node.best_effort
                || runs.get(&node.id).map(|r| r.state()) == Some(TaskState::Succeeded)
        }) {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        let tasks: Vec<TaskRun> = graph
            .tasks()
            .filter_map(|node| runs.remove(&node.id))
            .collect();
        let duration = clock.now().saturating_duration_since(start);

        let result = GraphRun {
            run_id,
            pipeline_id: pipeline_id.clone(),
            status,
            cancelled,
            started_at,
            ended_at: clock.timestamp(),
            tasks,
        };

        info!(
            status = %status,
            duration_ms = duration.as_millis() as u64,
            succeeded = result.count(TaskState::Succeeded),
            failed = result.count(TaskState::Failed),
            skipped = result.count(TaskState::Skipped),
            "graph run completed"
        );
        emit(
            &events,
            clock.as_ref(),
            Event::run_completed(pipeline_id, run_id, status, duration),
        )
        .await;

        Ok(result)
    }
}

async fn emit(bus: &Option<Arc<EventBus>>, clock: &dyn Clock, event: Event) {
    if let Some(bus) = bus {
        bus.emit(event.at(clock.now())).await;
    }
}
