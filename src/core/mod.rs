//! Core data model: identifiers, tasks, sensors, retry policies, the task
//! graph, per-run records and schedules.

pub mod clock;
pub mod context;
pub mod dag;
pub mod retry;
pub mod run;
pub mod schedule;
pub mod sensor;
pub mod task;
pub mod types;
