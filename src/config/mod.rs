//! Configuration loading and parsing.
//!
//! This module provides YAML-based pipeline definitions and turns them into
//! runnable [`Pipeline`](crate::pipeline::Pipeline)s.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{PipelineConfigBuilder, load_pipeline};
pub use error::ConfigError;
pub use types::{
    BackoffConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SENSOR_TIMEOUT_SECS, NotificationConfig,
    PipelineConfig, RetryConditionConfig, RetryConfig, ScheduleConfig, TaskConfig, TaskTypeConfig,
};
pub use yaml::YamlLoader;
