//! Cancellation tests.
//!
//! These run on the tokio clock: the token fires while a task is sleeping,
//! retrying or polling, and the run must end promptly with every task in a
//! terminal state.

use std::sync::Arc;
use std::time::Duration;
use tock::testing::{EventRecorder, FlakyAction, ScriptedCheck};
use tock::{
    DagExecutor, Event, EventBus, FailureKind, RetryPolicy, RunStatus, Sensor, SensorPolicy,
    TaskExecutor, TaskGraph, TaskNode, TaskState, TokioClock,
};
use tokio_util::sync::CancellationToken;

use crate::common::{failure, logging_action, real_engine, shared_log, sleeping_action, state};

/// Cancel `token` after `delay` of real time.
fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test]
async fn test_cancel_fails_in_flight_and_skips_pending() {
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::action(
            "downloading_rates",
            sleeping_action(Duration::from_secs(60)),
        ))
        .unwrap();
    graph
        .add_task(
            TaskNode::action("saving_rates", logging_action(&tasks))
                .depends_on("downloading_rates"),
        )
        .unwrap();

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let started = std::time::Instant::now();
    let run = real_engine()
        .run_with_cancel(&graph, 2, cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(run.cancelled);
    assert_eq!(run.status, RunStatus::Failed);

    assert_eq!(state(&run, "downloading_rates"), TaskState::Failed);
    assert_eq!(
        failure(&run, "downloading_rates").kind,
        FailureKind::Cancelled
    );
    assert_eq!(state(&run, "saving_rates"), TaskState::Skipped);
    assert_eq!(failure(&run, "saving_rates").kind, FailureKind::Cancelled);
    assert!(tasks.lock().await.is_empty());
}

#[tokio::test]
async fn test_cancel_during_retry_backoff_stops_retrying() {
    let flaky = Arc::new(FlakyAction::always_failing());

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(
            TaskNode::action("downloading_rates", flaky.clone())
                .with_retry(RetryPolicy::fixed(5, Duration::from_secs(300))),
        )
        .unwrap();

    let recorder = Arc::new(EventRecorder::new());
    let bus = Arc::new(EventBus::new());
    bus.register(recorder.clone()).await;
    let engine = DagExecutor::new(TaskExecutor::new(Arc::new(TokioClock)).with_event_bus(bus));

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let run = engine.run_with_cancel(&graph, 1, cancel).await.unwrap();

    assert!(run.cancelled);
    assert_eq!(flaky.calls(), 1);
    assert_eq!(state(&run, "downloading_rates"), TaskState::Failed);
    assert_eq!(
        failure(&run, "downloading_rates").kind,
        FailureKind::Cancelled
    );

    let events = recorder.events().await;
    let retries = events
        .iter()
        .filter(|e| matches!(e, Event::TaskRetrying { .. }))
        .count();
    assert_eq!(retries, 1);
    assert!(matches!(events.last(), Some(Event::RunCompleted { .. })));
}

#[tokio::test]
async fn test_cancel_during_sensor_polling() {
    let check = Arc::new(ScriptedCheck::always(false));
    let policy = SensorPolicy::new(Duration::from_secs(60), Duration::from_secs(3600)).unwrap();
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::sensor(
            "is_forex_currencies_file_available",
            Sensor::new(check.clone(), policy),
        ))
        .unwrap();
    graph
        .add_task(
            TaskNode::action("downloading_rates", logging_action(&tasks))
                .depends_on("is_forex_currencies_file_available"),
        )
        .unwrap();

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let run = real_engine()
        .run_with_cancel(&graph, 2, cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(check.calls(), 1);
    assert_eq!(
        failure(&run, "is_forex_currencies_file_available").kind,
        FailureKind::Cancelled
    );
    assert_eq!(state(&run, "downloading_rates"), TaskState::Skipped);
    assert!(tasks.lock().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::action("downloading_rates", logging_action(&tasks)))
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = real_engine()
        .run_with_cancel(&graph, 1, cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(state(&run, "downloading_rates"), TaskState::Skipped);
    assert!(tasks.lock().await.is_empty());
}
