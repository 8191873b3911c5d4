//! Common test utilities shared across integration tests.

use std::sync::Arc;
use std::time::Duration;
use tock::testing::ManualClock;
use tock::{
    Action, DagExecutor, FnAction, GraphRun, TaskExecutor, TaskFailure, TaskId, TaskState,
    TokioClock,
};
use tokio::sync::Mutex;

/// Shared, ordered log of names written by tasks and channels.
pub type SharedLog = Arc<Mutex<Vec<String>>>;

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// An action that appends its task id to `log` and succeeds.
pub fn logging_action(log: &SharedLog) -> Arc<dyn Action> {
    let log = Arc::clone(log);
    Arc::new(FnAction::new(move |ctx| {
        let log = Arc::clone(&log);
        async move {
            log.lock().await.push(ctx.task_id().to_string());
            Ok(())
        }
    }))
}

/// An action that sleeps for `duration` of real time.
pub fn sleeping_action(duration: Duration) -> Arc<dyn Action> {
    Arc::new(FnAction::new(move |_| async move {
        tokio::time::sleep(duration).await;
        Ok(())
    }))
}

/// Engine on a virtual clock, returned with the clock for timing assertions.
pub fn manual_engine() -> (DagExecutor, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (DagExecutor::new(TaskExecutor::new(clock.clone())), clock)
}

/// Engine on the tokio clock.
pub fn real_engine() -> DagExecutor {
    DagExecutor::new(TaskExecutor::new(Arc::new(TokioClock)))
}

/// Final state of `id`, panicking if the task is unknown.
pub fn state(run: &GraphRun, id: &str) -> TaskState {
    run.state_of(&TaskId::new(id))
        .unwrap_or_else(|| panic!("task {id} missing from run"))
}

/// Recorded failure of `id`, panicking if there is none.
pub fn failure<'a>(run: &'a GraphRun, id: &str) -> &'a TaskFailure {
    run.task(&TaskId::new(id))
        .and_then(|t| t.error())
        .unwrap_or_else(|| panic!("task {id} has no recorded failure"))
}

/// Attempts made by `id`.
pub fn attempts(run: &GraphRun, id: &str) -> u32 {
    run.task(&TaskId::new(id))
        .map(|t| t.attempts())
        .unwrap_or_else(|| panic!("task {id} missing from run"))
}
