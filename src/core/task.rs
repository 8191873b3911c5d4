//! Work units and their error type.
//!
//! An [`Action`] is the unit of non-sensor work a task performs. Sensors use
//! [`ReadinessCheck`](super::sensor::ReadinessCheck) instead. Both are
//! wrapped by a [`TaskNode`](super::dag::TaskNode) that adds the name,
//! dependencies, and retry policy.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use super::context::TaskContext;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A transient error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Task exceeded its execution timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// External command exited unsuccessfully.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// A sensor never reported ready before its deadline.
    #[error("sensor timed out after {elapsed:?} ({polls} polls)")]
    SensorTimedOut { elapsed: Duration, polls: u32 },

    /// The run was cancelled while the task was in flight.
    #[error("cancelled")]
    Cancelled,

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Check if this error is considered transient (should trigger retry
    /// under [`RetryCondition::TransientOnly`](super::retry::RetryCondition)).
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_) | TaskError::Timeout(_))
    }
}

/// A unit of work executed by a task.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use tock::{Action, TaskContext, TaskError};
///
/// struct CreateTable;
///
/// #[async_trait]
/// impl Action for CreateTable {
///     async fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
///         // run DDL against the warehouse here
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Execute one attempt of the work.
    ///
    /// Returning `Err` consumes one attempt of the task's retry budget.
    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<String> {
        None
    }
}

type BoxedActionFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// An [`Action`] backed by a closure.
///
/// The closure receives a clone of the context and returns a future, so it
/// can be written as `|ctx| async move { ... }`.
pub struct FnAction {
    func: Box<dyn Fn(TaskContext) -> BoxedActionFuture + Send + Sync>,
}

impl FnAction {
    /// Wrap an async closure as an action.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            func: Box::new(move |ctx| Box::pin(func(ctx))),
        }
    }
}

#[async_trait]
impl Action for FnAction {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.func)(ctx.clone()).await
    }
}
