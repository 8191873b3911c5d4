//! End-to-end pipeline tests.
//!
//! Graphs shaped like a daily rates pipeline: a sensor gating a chain of
//! actions, with retries and post-run notifications.

use std::sync::Arc;
use std::time::Duration;
use tock::testing::{ConcurrencyGauge, FlakyAction, RecordingChannel, ScriptedCheck};
use tock::{
    FailureKind, Pipeline, RetryPolicy, RunStatus, Sensor, SensorPolicy, TaskGraph, TaskId,
    TaskNode, TaskState,
};
use tokio_util::sync::CancellationToken;

use crate::common::{attempts, failure, logging_action, manual_engine, shared_log, state};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn ready_sensor(id: &str) -> TaskNode {
    let policy = SensorPolicy::new(secs(5), secs(20)).unwrap();
    TaskNode::sensor(id, Sensor::new(Arc::new(ScriptedCheck::always(true)), policy))
}

#[tokio::test]
async fn test_sensor_gated_chain_succeeds_and_notifies_in_order() {
    let tasks = shared_log();
    let notified = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph.add_task(ready_sensor("is_forex_rates_available")).unwrap();
    graph
        .add_task(
            TaskNode::action("downloading_rates", logging_action(&tasks))
                .depends_on("is_forex_rates_available"),
        )
        .unwrap();
    graph
        .add_task(
            TaskNode::action("saving_rates", logging_action(&tasks))
                .depends_on("downloading_rates"),
        )
        .unwrap();

    let email = Arc::new(RecordingChannel::with_log("sending_email", notified.clone()));
    let slack = Arc::new(RecordingChannel::with_log("sending_slack", notified.clone()));
    let pipeline = Pipeline::new("forex", graph)
        .with_channel(email.clone())
        .with_channel(slack.clone());

    let (engine, _clock) = manual_engine();
    let outcome = pipeline
        .run_once(&engine, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.run.status, RunStatus::Success);
    assert_eq!(outcome.run.count(TaskState::Succeeded), 3);
    assert_eq!(
        *tasks.lock().await,
        vec!["downloading_rates".to_string(), "saving_rates".to_string()]
    );
    assert_eq!(
        *notified.lock().await,
        vec!["sending_email".to_string(), "sending_slack".to_string()]
    );
    assert!(outcome.deliveries.all_delivered());

    let received = slack.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].status, RunStatus::Success);
    assert_eq!(received[0].run_id, outcome.run.run_id);
}

#[tokio::test]
async fn test_failed_task_skips_downstream_and_still_notifies() {
    let tasks = shared_log();
    let notified = shared_log();
    let flaky = Arc::new(FlakyAction::always_failing());

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph.add_task(ready_sensor("is_forex_rates_available")).unwrap();
    graph
        .add_task(
            TaskNode::action("downloading_rates", flaky.clone())
                .depends_on("is_forex_rates_available")
                .with_retry(RetryPolicy::fixed(1, secs(300))),
        )
        .unwrap();
    graph
        .add_task(
            TaskNode::action("saving_rates", logging_action(&tasks))
                .depends_on("downloading_rates"),
        )
        .unwrap();

    let email = Arc::new(RecordingChannel::with_log("sending_email", notified.clone()));
    let slack = Arc::new(RecordingChannel::with_log("sending_slack", notified.clone()));
    let pipeline = Pipeline::new("forex", graph)
        .with_channel(email.clone())
        .with_channel(slack.clone());

    let (engine, clock) = manual_engine();
    let outcome = pipeline
        .run_once(&engine, CancellationToken::new())
        .await
        .unwrap();
    let run = &outcome.run;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(flaky.calls(), 2);
    assert_eq!(attempts(run, "downloading_rates"), 2);
    assert_eq!(clock.sleeps(), vec![secs(300)]);

    assert_eq!(state(run, "is_forex_rates_available"), TaskState::Succeeded);
    assert_eq!(state(run, "downloading_rates"), TaskState::Failed);
    assert_eq!(state(run, "saving_rates"), TaskState::Skipped);
    assert!(tasks.lock().await.is_empty());

    let download = failure(run, "downloading_rates");
    assert_eq!(download.kind, FailureKind::Error);
    assert!(download.message.contains("call 2"));
    let saving = failure(run, "saving_rates");
    assert_eq!(saving.kind, FailureKind::UpstreamFailed);
    assert!(saving.message.contains("downloading_rates"));

    assert_eq!(
        *notified.lock().await,
        vec!["sending_email".to_string(), "sending_slack".to_string()]
    );
    for channel in [&email, &slack] {
        let received = channel.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, RunStatus::Failed);
        let failed: Vec<&str> = received[0]
            .failures
            .iter()
            .map(|f| f.task_id.as_str())
            .collect();
        assert_eq!(failed, vec!["downloading_rates", "saving_rates"]);
    }
}

#[tokio::test]
async fn test_skip_propagates_transitively_without_invoking_actions() {
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::action(
            "downloading_rates",
            Arc::new(FlakyAction::always_failing()),
        ))
        .unwrap();
    graph
        .add_task(
            TaskNode::action("saving_rates", logging_action(&tasks))
                .depends_on("downloading_rates"),
        )
        .unwrap();
    graph
        .add_task(
            TaskNode::action("creating_forex_rates_table", logging_action(&tasks))
                .depends_on("saving_rates"),
        )
        .unwrap();
    graph
        .add_task(
            TaskNode::action("forex_processing", logging_action(&tasks))
                .depends_on("creating_forex_rates_table"),
        )
        .unwrap();

    let (engine, _clock) = manual_engine();
    let run = engine.run(&graph, 4).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.count(TaskState::Skipped), 3);
    assert!(tasks.lock().await.is_empty());
    assert_eq!(
        failure(&run, "forex_processing").kind,
        FailureKind::UpstreamFailed
    );
}

#[tokio::test]
async fn test_retry_succeeds_on_later_attempt() {
    let flaky = Arc::new(FlakyAction::new(2));

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(
            TaskNode::action("downloading_rates", flaky.clone())
                .with_retry(RetryPolicy::exponential(3, secs(10))),
        )
        .unwrap();

    let (engine, clock) = manual_engine();
    let run = engine.run(&graph, 1).await.unwrap();

    assert!(run.is_success());
    assert_eq!(flaky.calls(), 3);
    assert_eq!(attempts(&run, "downloading_rates"), 3);
    assert_eq!(clock.sleeps(), vec![secs(10), secs(20)]);
}

#[tokio::test]
async fn test_best_effort_failure_keeps_run_successful() {
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::action("saving_rates", logging_action(&tasks)))
        .unwrap();
    graph
        .add_task(
            TaskNode::action("sending_slack", Arc::new(FlakyAction::always_failing()))
                .depends_on("saving_rates")
                .best_effort(true),
        )
        .unwrap();

    let (engine, _clock) = manual_engine();
    let run = engine.run(&graph, 2).await.unwrap();

    assert_eq!(state(&run, "sending_slack"), TaskState::Failed);
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_sensor_times_out_on_schedule() {
    let check = Arc::new(ScriptedCheck::always(false));
    let policy = SensorPolicy::new(secs(5), secs(20)).unwrap();
    let tasks = shared_log();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::sensor(
            "is_forex_rates_available",
            Sensor::new(check.clone(), policy),
        ))
        .unwrap();
    graph
        .add_task(
            TaskNode::action("downloading_rates", logging_action(&tasks))
                .depends_on("is_forex_rates_available"),
        )
        .unwrap();

    let (engine, clock) = manual_engine();
    let run = engine.run(&graph, 4).await.unwrap();

    assert_eq!(check.calls(), 4);
    assert_eq!(state(&run, "is_forex_rates_available"), TaskState::Failed);
    assert_eq!(
        failure(&run, "is_forex_rates_available").kind,
        FailureKind::SensorTimeout
    );
    assert_eq!(state(&run, "downloading_rates"), TaskState::Skipped);
    assert!(tasks.lock().await.is_empty());

    assert!(clock.elapsed() >= secs(20));
    assert!(clock.elapsed() < secs(25));
    let duration = run.duration();
    assert!(duration >= chrono::Duration::seconds(20));
    assert!(duration < chrono::Duration::seconds(25));
}

#[tokio::test]
async fn test_sensor_becomes_ready_after_errors() {
    let check = Arc::new(ScriptedCheck::new([
        Err(tock::TaskError::Transient("connection refused".to_string())),
        Ok(false),
        Ok(true),
    ]));
    let policy = SensorPolicy::new(secs(5), secs(20)).unwrap();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::sensor(
            "is_forex_rates_available",
            Sensor::new(check.clone(), policy),
        ))
        .unwrap();

    let (engine, clock) = manual_engine();
    let run = engine.run(&graph, 1).await.unwrap();

    assert!(run.is_success());
    assert_eq!(check.calls(), 3);
    assert_eq!(attempts(&run, "is_forex_rates_available"), 1);
    assert_eq!(clock.elapsed(), secs(10));
}

#[tokio::test]
async fn test_concurrency_limit_bounds_parallelism() {
    let gauge = ConcurrencyGauge::new();

    let mut graph = TaskGraph::new("wide");
    for id in ["a", "b", "c", "d", "e"] {
        graph
            .add_task(TaskNode::action(id, gauge.action(Duration::from_millis(40))))
            .unwrap();
    }

    let run = crate::common::real_engine().run(&graph, 2).await.unwrap();

    assert!(run.is_success());
    assert_eq!(gauge.peak(), 2);
    assert_eq!(gauge.started().len(), 5);
}

#[tokio::test]
async fn test_single_slot_runs_in_declaration_order() {
    let gauge = ConcurrencyGauge::new();
    let hold = Duration::from_millis(20);

    let mut graph = TaskGraph::new("wide");
    for id in ["c", "a", "b"] {
        graph.add_task(TaskNode::action(id, gauge.action(hold))).unwrap();
    }

    let started = std::time::Instant::now();
    let run = crate::common::real_engine().run(&graph, 1).await.unwrap();

    assert!(run.is_success());
    assert_eq!(gauge.peak(), 1);
    let order: Vec<TaskId> = ["c", "a", "b"].into_iter().map(TaskId::new).collect();
    assert_eq!(gauge.started(), order);
    assert_eq!(gauge.finished(), order);
    assert!(started.elapsed() >= hold * 3);
}
