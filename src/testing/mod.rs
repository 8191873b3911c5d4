//! Testing utilities for users of the tock library.
//!
//! - [`ManualClock`]: a virtual clock whose `sleep` returns immediately
//! - [`ScriptedCheck`]: a readiness check answering from a script
//! - [`FlakyAction`]: an action that fails N times then succeeds
//! - [`ConcurrencyGauge`]: actions that record start order and peak parallelism
//! - [`RecordingChannel`]: a notification channel that keeps what it receives
//! - [`EventRecorder`]: an event handler that keeps every event
//! - [`TestHarness`]: runs a graph on a [`ManualClock`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use crate::core::clock::Clock;
use crate::core::context::TaskContext;
use crate::core::dag::TaskGraph;
use crate::core::run::GraphRun;
use crate::core::sensor::ReadinessCheck;
use crate::core::task::{Action, TaskError};
use crate::core::types::TaskId;
use crate::events::{Event, EventHandler};
use crate::execution::{DagExecutor, RunError, TaskExecutor};
use crate::notify::{DEFAULT_SEND_TIMEOUT, Notification, NotificationChannel, NotifyError};

/// A clock that only moves when something sleeps on it.
///
/// `sleep` advances virtual time by the requested duration and returns at
/// once, recording the duration. Concurrent sleepers each advance the same
/// clock, so use it for sequential timing assertions.
///
/// `sleep_until` never moves time itself: it resolves once another sleeper
/// or [`advance`](Self::advance) has carried the clock past the deadline.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tock::Clock;
/// use tock::testing::ManualClock;
///
/// # tokio_test_block(async {
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.sleep(Duration::from_secs(300)).await;
/// assert_eq!(clock.now() - start, Duration::from_secs(300));
/// assert_eq!(clock.sleeps(), vec![Duration::from_secs(300)]);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_wall: DateTime<Utc>,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
    waiters: Mutex<Vec<(Instant, Waker)>>,
}

impl ManualClock {
    /// Create a clock at virtual time zero.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_wall: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
        let now = self.now();
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        waiters.retain(|(deadline, waker)| {
            if *deadline <= now {
                waker.wake_by_ref();
                false
            } else {
                true
            }
        });
    }

    /// Total virtual time elapsed.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    async fn sleep_until(&self, deadline: Instant) {
        std::future::poll_fn(|cx| {
            if self.now() >= deadline {
                return Poll::Ready(());
            }
            self.waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((deadline, cx.waker().clone()));
            if self.now() >= deadline {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.base_wall + offset
    }
}

/// A readiness check that answers from a script.
///
/// Each call pops the next scripted answer; once the script is exhausted
/// every further call returns the fallback (`Ok(false)` unless built with
/// [`ScriptedCheck::always`]).
pub struct ScriptedCheck {
    script: Mutex<VecDeque<Result<bool, TaskError>>>,
    fallback: bool,
    calls: AtomicU32,
}

impl ScriptedCheck {
    /// Answer with `script` in order, then `Ok(false)`.
    pub fn new(script: impl IntoIterator<Item = Result<bool, TaskError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Always answer `Ok(ready)`.
    pub fn always(ready: bool) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ready,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of times the check was invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessCheck for ScriptedCheck {
    async fn check(&self) -> Result<bool, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }
}

/// An action that fails a configurable number of times before succeeding.
///
/// # Example
///
/// ```
/// use tock::testing::FlakyAction;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let action = FlakyAction::new(2);
/// assert_eq!(action.calls(), 0);
/// ```
pub struct FlakyAction {
    failures: u32,
    transient: bool,
    message: String,
    calls: AtomicU32,
}

impl FlakyAction {
    /// Fail `failures` times, then succeed.
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            transient: false,
            message: "intentional test failure".to_string(),
            calls: AtomicU32::new(0),
        }
    }

    /// Never succeed.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Builder: fail with a custom message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Builder: fail with [`TaskError::Transient`] instead of `ExecutionFailed`.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Number of times the action was executed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for FlakyAction {
    async fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            let message = format!("{} (call {})", self.message, call + 1);
            return Err(if self.transient {
                TaskError::Transient(message)
            } else {
                TaskError::ExecutionFailed(message)
            });
        }
        Ok(())
    }
}

/// Tracks how many gauged actions run at once and the order they started in.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<TaskId>>,
    finished: Mutex<Vec<TaskId>>,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An action that holds a slot for `hold` of real time.
    pub fn action(self: &Arc<Self>, hold: Duration) -> Arc<dyn Action> {
        Arc::new(GaugedAction {
            gauge: Arc::clone(self),
            hold,
        })
    }

    /// Highest number of gauged actions observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Tasks in the order they started.
    pub fn started(&self) -> Vec<TaskId> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tasks in the order they finished.
    pub fn finished(&self) -> Vec<TaskId> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct GaugedAction {
    gauge: Arc<ConcurrencyGauge>,
    hold: Duration,
}

#[async_trait]
impl Action for GaugedAction {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.gauge
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.task_id().clone());
        let now = self.gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;

        self.gauge.running.fetch_sub(1, Ordering::SeqCst);
        self.gauge
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.task_id().clone());
        Ok(())
    }
}

/// A notification channel that records every notification it receives.
///
/// Channels built with [`with_log`](Self::with_log) also append their name
/// to a shared log, so several channels can assert on delivery order.
pub struct RecordingChannel {
    name: String,
    fail: bool,
    hang: bool,
    timeout: Duration,
    received: tokio::sync::Mutex<Vec<Notification>>,
    log: Option<Arc<tokio::sync::Mutex<Vec<String>>>>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: false,
            hang: false,
            timeout: DEFAULT_SEND_TIMEOUT,
            received: tokio::sync::Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// A channel that appends its name to `log` on every send.
    pub fn with_log(name: impl Into<String>, log: Arc<tokio::sync::Mutex<Vec<String>>>) -> Self {
        Self {
            log: Some(log),
            ..Self::new(name)
        }
    }

    /// Builder: record the notification, then report a delivery failure.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Builder: record the notification, then never answer.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Builder: send timeout reported to the fan-out.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Notifications received so far.
    pub async fn received(&self) -> Vec<Notification> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(log) = &self.log {
            log.lock().await.push(self.name.clone());
        }
        self.received.lock().await.push(notification.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(NotifyError::Other(format!("{} rejected the message", self.name)));
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Event handler that keeps every event it receives.
#[derive(Default)]
pub struct EventRecorder {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Runs graphs on a [`ManualClock`] so retries and sensors finish instantly.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tock::testing::{FlakyAction, TestHarness};
/// use tock::{RetryPolicy, TaskGraph, TaskNode};
/// use std::time::Duration;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let mut graph = TaskGraph::new("forex_data_pipeline");
/// graph.add_task(
///     TaskNode::action("downloading_rates", Arc::new(FlakyAction::new(1)))
///         .with_retry(RetryPolicy::fixed(1, Duration::from_secs(300))),
/// ).unwrap();
///
/// let harness = TestHarness::new();
/// let run = harness.run(&graph).await.unwrap();
/// assert!(run.is_success());
/// assert_eq!(harness.clock().sleeps(), vec![Duration::from_secs(300)]);
/// # });
/// ```
pub struct TestHarness {
    clock: Arc<ManualClock>,
    concurrency_limit: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new()),
            concurrency_limit: 4,
        }
    }

    /// Builder: set the concurrency limit.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// The virtual clock used for runs.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Run `graph` to completion.
    pub async fn run(&self, graph: &TaskGraph) -> Result<GraphRun, RunError> {
        let engine = DagExecutor::new(TaskExecutor::new(self.clock.clone()));
        engine.run(graph, self.concurrency_limit).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
