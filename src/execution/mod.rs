//! Task execution engine.
//!
//! This module provides the engine that drives a task graph to completion,
//! the per-task executor with retry and sensor handling, and the built-in
//! actions and readiness checks.

mod checks;
mod command;
mod dag_executor;
mod executor;

pub use checks::{FileCheck, HttpCheck};
pub use command::{CommandAction, CommandActionBuilder};
pub use dag_executor::{DagExecutor, RunError};
pub use executor::TaskExecutor;
