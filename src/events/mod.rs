//! Lifecycle events and event handling.
//!
//! The engine emits an [`Event`] for every run and task lifecycle change.
//! Handlers registered on an [`EventBus`] receive them in emission order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::run::{RunStatus, TaskFailure};
use crate::core::types::{PipelineId, RunId, TaskId};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A graph run has started.
    RunStarted {
        pipeline_id: PipelineId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A graph run reached a terminal status.
    RunCompleted {
        pipeline_id: PipelineId,
        run_id: RunId,
        status: RunStatus,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task attempt has started.
    TaskStarted {
        task_id: TaskId,
        run_id: RunId,
        attempt: u32,
        timestamp: Instant,
    },

    /// A task attempt failed and another attempt will follow after `delay`.
    ///
    /// `attempt` is the attempt that just failed (1-indexed); `max_attempts`
    /// counts the initial attempt, so a retry budget of 3 reports 4.
    TaskRetrying {
        task_id: TaskId,
        run_id: RunId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
        timestamp: Instant,
    },

    /// A task succeeded.
    TaskSucceeded {
        task_id: TaskId,
        run_id: RunId,
        attempts: u32,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task reached FAILED.
    TaskFailed {
        task_id: TaskId,
        run_id: RunId,
        attempts: u32,
        failure: TaskFailure,
        timestamp: Instant,
    },

    /// A task was skipped without running.
    TaskSkipped {
        task_id: TaskId,
        run_id: RunId,
        reason: TaskFailure,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. }
            | Event::RunCompleted { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskRetrying { timestamp, .. }
            | Event::TaskSucceeded { timestamp, .. }
            | Event::TaskFailed { timestamp, .. }
            | Event::TaskSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// Builder: stamp the event with `at`, typically the executor clock's `now()`.
    pub fn at(mut self, at: Instant) -> Self {
        match &mut self {
            Event::RunStarted { timestamp, .. }
            | Event::RunCompleted { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskRetrying { timestamp, .. }
            | Event::TaskSucceeded { timestamp, .. }
            | Event::TaskFailed { timestamp, .. }
            | Event::TaskSkipped { timestamp, .. } => *timestamp = at,
        }
        self
    }

    /// Task the event refers to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskRetrying { task_id, .. }
            | Event::TaskSucceeded { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskSkipped { task_id, .. } => Some(task_id),
            Event::RunStarted { .. } | Event::RunCompleted { .. } => None,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(pipeline_id: PipelineId, run_id: RunId) -> Self {
        Event::RunStarted {
            pipeline_id,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(
        pipeline_id: PipelineId,
        run_id: RunId,
        status: RunStatus,
        duration: Duration,
    ) -> Self {
        Event::RunCompleted {
            pipeline_id,
            run_id,
            status,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId, run_id: RunId, attempt: u32) -> Self {
        Event::TaskStarted {
            task_id,
            run_id,
            attempt,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(
        task_id: TaskId,
        run_id: RunId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    ) -> Self {
        Event::TaskRetrying {
            task_id,
            run_id,
            attempt,
            max_attempts,
            delay,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSucceeded event.
    pub fn task_succeeded(task_id: TaskId, run_id: RunId, attempts: u32, duration: Duration) -> Self {
        Event::TaskSucceeded {
            task_id,
            run_id,
            attempts,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, run_id: RunId, attempts: u32, failure: TaskFailure) -> Self {
        Event::TaskFailed {
            task_id,
            run_id,
            attempts,
            failure,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(task_id: TaskId, run_id: RunId, reason: TaskFailure) -> Self {
        Event::TaskSkipped {
            task_id,
            run_id,
            reason,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
