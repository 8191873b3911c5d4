//! YAML configuration parsing.
//!
//! Parses pipeline definitions from YAML and validates them before any graph
//! is built.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use super::error::ConfigError;
use super::types::{NotificationConfig, PipelineConfig, TaskConfig, TaskTypeConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a pipeline configuration from a file.
    pub fn load_pipeline_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_pipeline_config(&config)?;
        Ok(config)
    }

    /// Parse a pipeline configuration from a YAML string.
    pub fn parse_pipeline_config(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_pipeline_config(&config)?;
        Ok(config)
    }

    /// Validate a pipeline configuration.
    pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }

        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "pipeline must have at least one task".into(),
            ));
        }

        if config.concurrency_limit == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "concurrency_limit cannot be zero".into(),
            ));
        }

        let mut task_ids: HashSet<&str> = HashSet::new();
        for task in &config.tasks {
            if task.id.trim().is_empty() {
                return Err(ConfigError::MissingField("tasks[].id".into()));
            }
            if !task_ids.insert(&task.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
            Self::validate_task(task)?;
        }

        for task in &config.tasks {
            let mut seen_deps = HashSet::new();
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' cannot depend on itself",
                        task.id
                    )));
                }
                if !task_ids.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
                if !seen_deps.insert(dep) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' has duplicate dependency '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        Self::validate_no_cycles(config)?;

        for notification in &config.notifications {
            Self::validate_notification(notification)?;
        }

        Ok(())
    }

    fn validate_task(task: &TaskConfig) -> Result<(), ConfigError> {
        let sensor_timing = match &task.task_type {
            TaskTypeConfig::HttpSensor {
                url,
                poll_interval_secs,
                timeout_secs,
                ..
            } => {
                if url.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!("{}.url", task.id)));
                }
                Some((*poll_interval_secs, *timeout_secs))
            }
            TaskTypeConfig::FileSensor {
                path,
                poll_interval_secs,
                timeout_secs,
            } => {
                if path.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!("{}.path", task.id)));
                }
                Some((*poll_interval_secs, *timeout_secs))
            }
            TaskTypeConfig::Command {
                command, script, ..
            } => {
                match (command, script) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::InvalidConfig(format!(
                            "task '{}' sets both command and script",
                            task.id
                        )));
                    }
                    (None, None) => {
                        return Err(ConfigError::MissingField(format!(
                            "{}.command or {}.script",
                            task.id, task.id
                        )));
                    }
                    (Some(program), None) if program.trim().is_empty() => {
                        return Err(ConfigError::MissingField(format!("{}.command", task.id)));
                    }
                    _ => {}
                }
                None
            }
        };

        if let Some((poll, timeout)) = sensor_timing {
            if poll == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}': poll_interval_secs must be greater than zero",
                    task.id
                )));
            }
            if timeout < poll {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}': timeout_secs ({timeout}) is shorter than poll_interval_secs ({poll})",
                    task.id
                )));
            }
        }

        Ok(())
    }

    fn validate_notification(notification: &NotificationConfig) -> Result<(), ConfigError> {
        match notification {
            NotificationConfig::Webhook { url, .. } if url.trim().is_empty() => Err(
                ConfigError::MissingField(format!("{}.url", notification.name())),
            ),
            NotificationConfig::Email { to, .. } if to.is_empty() => Err(
                ConfigError::MissingField(format!("{}.to", notification.name())),
            ),
            NotificationConfig::Email {
                command: Some(command),
                ..
            } if command.is_empty() => Err(ConfigError::InvalidConfig(format!(
                "notification '{}': command cannot be empty",
                notification.name()
            ))),
            NotificationConfig::Webhook {
                timeout_secs: Some(0),
                ..
            }
            | NotificationConfig::Email {
                timeout_secs: Some(0),
                ..
            } => Err(ConfigError::InvalidConfig(format!(
                "notification '{}': timeout_secs must be greater than zero",
                notification.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Validate that there are no cycles in the task dependency graph.
    fn validate_no_cycles(config: &PipelineConfig) -> Result<(), ConfigError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut reverse_deps: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in &config.tasks {
            in_degree.insert(&task.id, task.depends_on.len());
            reverse_deps.insert(&task.id, Vec::new());
        }

        for task in &config.tasks {
            for dep in &task.depends_on {
                reverse_deps.entry(dep.as_str()).or_default().push(&task.id);
            }
        }

        // Seed in declaration order so the error lists tasks deterministically.
        let mut queue: VecDeque<&str> = config
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id.as_str())
            .collect();

        let mut visited_count = 0;

        while let Some(id) = queue.pop_front() {
            visited_count += 1;

            if let Some(downstream) = reverse_deps.get(id) {
                for next in downstream {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        if visited_count != config.tasks.len() {
            let cycle_tasks: Vec<&str> = config
                .tasks
                .iter()
                .map(|t| t.id.as_str())
                .filter(|id| in_degree.get(id).is_some_and(|d| *d > 0))
                .collect();

            return Err(ConfigError::InvalidConfig(format!(
                "dependency cycle detected involving tasks: {}",
                cycle_tasks.join(", ")
            )));
        }

        Ok(())
    }
}
