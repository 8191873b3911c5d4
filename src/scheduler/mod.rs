//! Schedule-driven execution.
//!
//! This module provides the loop that runs a pipeline at each tick of its
//! schedule, with optional catchup of missed ticks, and a handle for manual
//! triggers and shutdown.

mod handle;
mod runner;
mod types;

pub use handle::RunnerHandle;
pub use runner::{MAX_MISSED_TICKS, ScheduleRunner};
pub use types::{RunnerSummary, SchedulerError, TickRun, Trigger};
