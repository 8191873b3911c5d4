//! HTTP sensors and webhook notifications against a local axum server.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tock::testing::ManualClock;
use tock::{
    DagExecutor, HttpCheck, ReadinessCheck, RunStatus, Sensor, SensorPolicy, TaskExecutor,
    TaskGraph, TaskNode, TaskState, load_pipeline,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::{failure, manual_engine};

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A rates API that answers 503 for the first `outages` requests.
fn rates_api(outages: u32, hits: Arc<AtomicU32>) -> Router {
    Router::new().route(
        "/latest",
        get(move || {
            let hits = hits.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                if n < outages {
                    (StatusCode::SERVICE_UNAVAILABLE, "maintenance".to_string())
                } else {
                    (
                        StatusCode::OK,
                        r#"{"base": "EUR", "rates": {"USD": 1.08}}"#.to_string(),
                    )
                }
            }
        }),
    )
}

#[tokio::test]
async fn test_http_check_requires_success_and_body_match() {
    let hits = Arc::new(AtomicU32::new(0));
    let base = serve(rates_api(1, hits.clone())).await;

    let check = HttpCheck::new(format!("{base}/latest"))
        .unwrap()
        .expect_body_contains("rates");
    assert!(!check.check().await.unwrap());
    assert!(check.check().await.unwrap());

    let wrong_needle = HttpCheck::new(format!("{base}/latest"))
        .unwrap()
        .expect_body_contains("quotes");
    assert!(!wrong_needle.check().await.unwrap());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_http_check_unreachable_is_error() {
    let check = HttpCheck::with_timeout("http://127.0.0.1:1/latest", Duration::from_secs(2)).unwrap();
    assert!(check.check().await.is_err());
}

#[tokio::test]
async fn test_http_sensor_waits_out_outage() {
    let hits = Arc::new(AtomicU32::new(0));
    let base = serve(rates_api(2, hits.clone())).await;

    let check = HttpCheck::new(format!("{base}/latest"))
        .unwrap()
        .expect_body_contains("rates");
    let policy = SensorPolicy::new(Duration::from_secs(5), Duration::from_secs(20)).unwrap();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::sensor(
            "is_forex_rates_available",
            Sensor::new(Arc::new(check), policy),
        ))
        .unwrap();

    let clock = Arc::new(ManualClock::new());
    let engine = DagExecutor::new(TaskExecutor::new(clock.clone()));
    let run = engine.run(&graph, 1).await.unwrap();

    assert!(run.is_success());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(clock.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn test_http_sensor_times_out_when_never_ready() {
    let hits = Arc::new(AtomicU32::new(0));
    let base = serve(rates_api(u32::MAX, hits.clone())).await;

    let check = HttpCheck::new(format!("{base}/latest")).unwrap();
    let policy = SensorPolicy::new(Duration::from_secs(5), Duration::from_secs(20)).unwrap();

    let mut graph = TaskGraph::new("forex_data_pipeline");
    graph
        .add_task(TaskNode::sensor(
            "is_forex_rates_available",
            Sensor::new(Arc::new(check), policy),
        ))
        .unwrap();

    let (engine, _clock) = manual_engine();
    let run = engine.run(&graph, 1).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert_eq!(
        failure(&run, "is_forex_rates_available").kind,
        tock::FailureKind::SensorTimeout
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_yaml_pipeline_with_http_sensor_posts_webhook() {
    let hits = Arc::new(AtomicU32::new(0));
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = received.clone();
    let router = rates_api(2, hits.clone()).route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push(body);
                "ok"
            }
        }),
    );
    let base = serve(router).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forex.yaml");
    let yaml = format!(
        r#"
id: forex_data_pipeline
tasks:
  - id: is_forex_rates_available
    type: http_sensor
    url: {base}/latest
    contains: rates
    poll_interval_secs: 5
    timeout_secs: 20
  - id: forex_processing
    type: command
    command: "true"
    depends_on: [is_forex_rates_available]
notifications:
  - type: webhook
    name: sending_slack_notification
    url: {base}/hook
    message: "DAG forex_data_pipeline: DONE"
    username: airflow
"#
    );
    std::fs::write(&path, yaml).unwrap();
    let pipeline = load_pipeline(&path).unwrap();

    let (engine, _clock) = manual_engine();
    let outcome = pipeline
        .run_once(&engine, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success(), "run failed: {:?}", outcome.run.failures());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(
        outcome
            .run
            .state_of(&tock::TaskId::new("forex_processing")),
        Some(TaskState::Succeeded)
    );
    assert!(outcome.deliveries.all_delivered());

    let bodies = received.lock().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["text"], "DAG forex_data_pipeline: DONE");
    assert_eq!(bodies[0]["username"], "airflow");
    assert_eq!(bodies[0]["status"], "success");
    assert_eq!(bodies[0]["pipeline"], "forex_data_pipeline");
}
