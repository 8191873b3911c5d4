//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::dag::GraphError;
use crate::core::schedule::ScheduleError;
use crate::core::sensor::SensorError;
use crate::notify::NotifyError;

/// Errors that can occur when loading or building a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The task graph is malformed.
    #[error("invalid task graph: {0}")]
    Graph(#[from] GraphError),

    /// A schedule expression or timezone is malformed.
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// Sensor timing is malformed.
    #[error("task '{task}': {source}")]
    Sensor {
        task: String,
        #[source]
        source: SensorError,
    },

    /// A notification channel could not be constructed.
    #[error("notification '{channel}': {source}")]
    Notification {
        channel: String,
        #[source]
        source: NotifyError,
    },

    /// An HTTP sensor client could not be constructed.
    #[error("task '{task}': {source}")]
    HttpClient {
        task: String,
        #[source]
        source: reqwest::Error,
    },
}
