//! tock - a small batch-workflow orchestrator.
//!
//! A [`TaskGraph`] of sensors and actions runs once per schedule tick under a
//! concurrency limit. Sensors poll a readiness check until it passes or time
//! runs out, actions retry within their budget, a failed task skips everything
//! downstream, and every finished run is fanned out to notification channels.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod testing;

pub use config::{ConfigError, PipelineConfig, PipelineConfigBuilder, YamlLoader, load_pipeline};
pub use core::clock::{Clock, TokioClock};
pub use core::context::TaskContext;
pub use core::dag::{GraphError, ReadySet, TaskGraph, TaskKind, TaskNode};
pub use core::retry::{Backoff, RetryCondition, RetryPolicy};
pub use core::run::{
    FailureKind, GraphRun, RunStatus, TaskFailure, TaskRun, TaskState, Transition,
    TransitionError,
};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::sensor::{ReadinessCheck, Sensor, SensorError, SensorOutcome, SensorPolicy};
pub use core::task::{Action, FnAction, TaskError};
pub use core::types::{PipelineId, RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CommandAction, CommandActionBuilder, DagExecutor, FileCheck, HttpCheck, RunError,
    TaskExecutor,
};
pub use notify::{
    CommandTransport, DeliveryReport, LogTransport, Notification, NotificationChannel,
    NotificationFanout, NotifyError, TemplateChannel, WebhookChannel, DEFAULT_SEND_TIMEOUT,
};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use scheduler::{RunnerHandle, RunnerSummary, ScheduleRunner, SchedulerError};
