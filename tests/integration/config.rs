//! Pipelines loaded from YAML, running real shell commands.

#![cfg(unix)]

use std::path::Path;
use tock::{FailureKind, RunStatus, TaskState, load_pipeline};
use tokio_util::sync::CancellationToken;

use crate::common::{attempts, failure, real_engine, state};

fn write_pipeline(dir: &Path, yaml: &str) -> std::path::PathBuf {
    let path = dir.join("pipeline.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[tokio::test]
async fn test_yaml_pipeline_runs_commands_after_file_sensor() {
    let dir = tempfile::tempdir().unwrap();
    let currencies = dir.path().join("forex_currencies.csv");
    std::fs::write(&currencies, "base;with_pairs\nEUR;USD NZD JPY GBP CAD\n").unwrap();
    let rates = dir.path().join("forex_rates.json");

    let yaml = format!(
        r#"
id: forex_data_pipeline
concurrency_limit: 2
tasks:
  - id: is_forex_currencies_file_available
    type: file_sensor
    path: {currencies}
    poll_interval_secs: 1
    timeout_secs: 5
  - id: downloading_rates
    type: command
    script: printf 'base=%s\n' "$BASE" > {rates}
    env:
      BASE: EUR
    depends_on: [is_forex_currencies_file_available]
  - id: saving_rates
    type: command
    command: test
    args: ["-s", "{rates}"]
    depends_on: [downloading_rates]
"#,
        currencies = currencies.display(),
        rates = rates.display(),
    );
    let pipeline = load_pipeline(write_pipeline(dir.path(), &yaml)).unwrap();

    let outcome = pipeline
        .run_once(&real_engine(), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success(), "run failed: {:?}", outcome.run.failures());
    assert_eq!(outcome.run.count(TaskState::Succeeded), 3);
    let written = std::fs::read_to_string(&rates).unwrap();
    assert_eq!(written.trim(), "base=EUR");
}

#[tokio::test]
async fn test_failing_command_retries_then_skips_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("saved");

    let yaml = format!(
        r#"
id: forex_data_pipeline
tasks:
  - id: downloading_rates
    type: command
    script: echo "rates api unreachable" >&2; exit 3
    retry:
      max_attempts: 1
      delay_secs: 0
  - id: saving_rates
    type: command
    script: touch {marker}
    depends_on: [downloading_rates]
"#,
        marker = marker.display(),
    );
    let pipeline = load_pipeline(write_pipeline(dir.path(), &yaml)).unwrap();

    let outcome = pipeline
        .run_once(&real_engine(), CancellationToken::new())
        .await
        .unwrap();
    let run = &outcome.run;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts(run, "downloading_rates"), 2);
    let download = failure(run, "downloading_rates");
    assert_eq!(download.kind, FailureKind::Error);
    assert!(download.message.contains("code 3"), "{}", download.message);
    assert!(download.message.contains("rates api unreachable"));

    assert_eq!(state(run, "saving_rates"), TaskState::Skipped);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_email_channel_pipes_rendered_mail_to_command() {
    let dir = tempfile::tempdir().unwrap();
    let mail = dir.path().join("mail.txt");

    let yaml = format!(
        r#"
id: forex_data_pipeline
tasks:
  - id: forex_processing
    type: command
    command: "true"
notifications:
  - type: email
    name: sending_email
    to: [ops@forex.test]
    subject: "{{pipeline}} finished: {{status}}"
    body: "<h3>forex_data_pipeline succeeded</h3>"
    command: [sh, -c, "cat > {mail}"]
"#,
        mail = mail.display(),
    );
    let pipeline = load_pipeline(write_pipeline(dir.path(), &yaml)).unwrap();

    let outcome = pipeline
        .run_once(&real_engine(), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(outcome.deliveries.all_delivered());
    let written = std::fs::read_to_string(&mail).unwrap();
    assert!(written.contains("To: ops@forex.test"));
    assert!(written.contains("Subject: forex_data_pipeline finished: SUCCESS"));
    assert!(written.contains("<h3>forex_data_pipeline succeeded</h3>"));
}

#[tokio::test]
async fn test_undeliverable_notification_does_not_fail_run() {
    let dir = tempfile::tempdir().unwrap();

    let yaml = r#"
id: forex_data_pipeline
tasks:
  - id: forex_processing
    type: command
    command: "true"
notifications:
  - type: email
    name: sending_email
    to: [ops@forex.test]
    command: [sh, -c, "exit 1"]
  - type: log
"#;
    let pipeline = load_pipeline(write_pipeline(dir.path(), yaml)).unwrap();

    let outcome = pipeline
        .run_once(&real_engine(), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    let failed: Vec<&str> = outcome
        .deliveries
        .failures()
        .map(|d| d.channel.as_str())
        .collect();
    assert_eq!(failed, vec!["sending_email"]);
}

#[test]
fn test_demo_pipeline_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/forex_pipeline.yaml");
    let pipeline = load_pipeline(path).unwrap();

    assert_eq!(pipeline.id().as_str(), "forex_data_pipeline");
    assert_eq!(pipeline.graph().len(), 6);
    assert_eq!(pipeline.concurrency_limit(), 2);
    assert!(!pipeline.catchup());
    assert!(pipeline.schedule().is_some());
    assert_eq!(
        pipeline.fanout().channel_names(),
        vec![
            "sending_email_notification",
            "sending_slack_notification",
            "log"
        ]
    );
}
