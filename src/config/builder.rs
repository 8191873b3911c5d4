//! Pipeline builder from YAML configuration.
//!
//! This module converts a validated [`PipelineConfig`] into a runnable
//! [`Pipeline`] with concrete sensors, actions and notification channels.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::dag::{TaskGraph, TaskNode};
use crate::core::retry::{Backoff, RetryCondition, RetryPolicy};
use crate::core::schedule::Schedule;
use crate::core::sensor::{Sensor, SensorPolicy};
use crate::execution::{CommandAction, FileCheck, HttpCheck};
use crate::notify::{
    CommandTransport, DEFAULT_SEND_TIMEOUT, LogTransport, NotificationChannel, TemplateChannel,
    WebhookChannel,
};
use crate::pipeline::{DEFAULT_CONCURRENCY_LIMIT, Pipeline};

use super::error::ConfigError;
use super::types::{
    BackoffConfig, NotificationConfig, PipelineConfig, RetryConditionConfig, RetryConfig,
    TaskConfig, TaskTypeConfig,
};
use super::yaml::YamlLoader;

const DEFAULT_SUBJECT: &str = "{pipeline}: {status}";
const DEFAULT_BODY: &str = "Pipeline {pipeline} finished with status {status} in {duration} \
(run {run_id}). Succeeded: {succeeded}, skipped: {skipped}, failed: {failed}.";

/// Builder for creating Pipelines from YAML configuration.
pub struct PipelineConfigBuilder;

impl PipelineConfigBuilder {
    /// Build a Pipeline from a PipelineConfig.
    pub fn build(config: PipelineConfig) -> Result<Pipeline, ConfigError> {
        YamlLoader::validate_pipeline_config(&config)?;

        let default_retry = config.default_retry.as_ref().map(Self::build_retry_policy);

        let mut graph = TaskGraph::new(config.id.as_str());
        for task_config in &config.tasks {
            let node = Self::build_task(task_config, default_retry.as_ref())?;
            graph.add_task(node)?;
        }
        graph.validate()?;

        let mut pipeline = Pipeline::new(config.display_name(), graph)
            .with_concurrency_limit(config.concurrency_limit.unwrap_or(DEFAULT_CONCURRENCY_LIMIT))
            .with_catchup(config.catchup);

        if let Some(schedule_config) = &config.schedule {
            let tz = schedule_config.timezone().unwrap_or("UTC");
            let schedule = Schedule::with_timezone(schedule_config.cron(), tz)?;
            pipeline = pipeline.with_schedule(schedule);
        }

        for notification in &config.notifications {
            pipeline = pipeline.with_channel(Self::build_channel(notification)?);
        }

        Ok(pipeline)
    }

    /// Build a TaskNode from TaskConfig.
    fn build_task(
        config: &TaskConfig,
        default_retry: Option<&RetryPolicy>,
    ) -> Result<TaskNode, ConfigError> {
        let mut node = match &config.task_type {
            TaskTypeConfig::HttpSensor {
                url,
                contains,
                poll_interval_secs,
                timeout_secs,
                request_timeout_secs,
            } => {
                let check = match request_timeout_secs {
                    Some(secs) => HttpCheck::with_timeout(url, Duration::from_secs(*secs)),
                    None => HttpCheck::new(url),
                }
                .map_err(|source| ConfigError::HttpClient {
                    task: config.id.clone(),
                    source,
                })?;
                let check = match contains {
                    Some(needle) => check.expect_body_contains(needle),
                    None => check,
                };
                let policy = Self::sensor_policy(config, *poll_interval_secs, *timeout_secs)?;
                TaskNode::sensor(config.id.as_str(), Sensor::new(Arc::new(check), policy))
            }
            TaskTypeConfig::FileSensor {
                path,
                poll_interval_secs,
                timeout_secs,
            } => {
                let policy = Self::sensor_policy(config, *poll_interval_secs, *timeout_secs)?;
                TaskNode::sensor(
                    config.id.as_str(),
                    Sensor::new(Arc::new(FileCheck::new(path)), policy),
                )
            }
            TaskTypeConfig::Command {
                command,
                script,
                args,
                env,
                working_dir,
                timeout_secs,
            } => {
                let mut builder = match (command, script) {
                    (Some(program), _) => CommandAction::builder(program).args(args),
                    (None, Some(script)) => CommandAction::builder("sh").arg("-c").arg(script),
                    (None, None) => {
                        return Err(ConfigError::MissingField(format!(
                            "{}.command or {}.script",
                            config.id, config.id
                        )));
                    }
                };

                builder = builder.envs(env.iter().map(|(k, v)| (k.clone(), v.clone())));

                if let Some(dir) = working_dir {
                    builder = builder.working_dir(dir);
                }

                if let Some(secs) = timeout_secs {
                    builder = builder.timeout(Duration::from_secs(*secs));
                }

                TaskNode::action(config.id.as_str(), Arc::new(builder.build()))
            }
        };

        for dep in &config.depends_on {
            node = node.depends_on(dep.as_str());
        }

        // Sensor nodes never retry; the policy only applies to actions.
        let retry = config
            .retry
            .as_ref()
            .map(Self::build_retry_policy)
            .or_else(|| default_retry.cloned());
        if let Some(retry) = retry {
            node = node.with_retry(retry);
        }

        Ok(node.best_effort(config.best_effort))
    }

    fn sensor_policy(
        config: &TaskConfig,
        poll_interval_secs: u64,
        timeout_secs: u64,
    ) -> Result<SensorPolicy, ConfigError> {
        SensorPolicy::new(
            Duration::from_secs(poll_interval_secs),
            Duration::from_secs(timeout_secs),
        )
        .map_err(|source| ConfigError::Sensor {
            task: config.id.clone(),
            source,
        })
    }

    /// Build a RetryPolicy from RetryConfig.
    fn build_retry_policy(config: &RetryConfig) -> RetryPolicy {
        let delay = Duration::from_secs(config.delay_secs);
        let condition = match config.condition {
            RetryConditionConfig::Always => RetryCondition::Always,
            RetryConditionConfig::TransientOnly => RetryCondition::TransientOnly,
            RetryConditionConfig::Never => RetryCondition::Never,
        };
        let backoff = match &config.backoff {
            BackoffConfig::Fixed => Backoff::Fixed,
            BackoffConfig::Exponential {
                multiplier,
                max_delay_secs,
            } => Backoff::Exponential {
                multiplier: *multiplier,
                max_delay: max_delay_secs.map(Duration::from_secs),
            },
        };

        RetryPolicy::fixed(config.max_attempts, delay)
            .with_backoff(backoff)
            .with_condition(condition)
    }

    /// Build a notification channel from NotificationConfig.
    fn build_channel(
        config: &NotificationConfig,
    ) -> Result<Arc<dyn NotificationChannel>, ConfigError> {
        let name = config.name().to_string();
        let channel: Arc<dyn NotificationChannel> = match config {
            NotificationConfig::Webhook {
                url,
                message,
                username,
                timeout_secs,
                ..
            } => {
                let webhook = match timeout_secs {
                    Some(secs) => {
                        WebhookChannel::with_timeout(&name, url, Duration::from_secs(*secs))
                    }
                    None => WebhookChannel::new(&name, url),
                }
                .map_err(|source| ConfigError::Notification {
                    channel: name.clone(),
                    source,
                })?;
                let webhook = match message {
                    Some(message) => webhook.with_message(message),
                    None => webhook,
                };
                let webhook = match username {
                    Some(username) => webhook.with_username(username),
                    None => webhook,
                };
                Arc::new(webhook)
            }
            NotificationConfig::Email {
                to,
                subject,
                body,
                command,
                timeout_secs,
                ..
            } => {
                let transport = match command.as_deref() {
                    Some([program, args @ ..]) => CommandTransport::new(program, args.to_vec()),
                    _ => CommandTransport::sendmail(),
                };
                let timeout = timeout_secs.map_or(DEFAULT_SEND_TIMEOUT, Duration::from_secs);
                Arc::new(
                    TemplateChannel::new(
                        &name,
                        subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
                        body.as_deref().unwrap_or(DEFAULT_BODY),
                        Arc::new(transport.with_timeout(timeout)),
                    )
                    .with_recipients(to.clone())
                    .with_timeout(timeout),
                )
            }
            NotificationConfig::Log { subject, body, .. } => Arc::new(TemplateChannel::new(
                &name,
                subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
                body.as_deref().unwrap_or(DEFAULT_BODY),
                Arc::new(LogTransport),
            )),
        };
        Ok(channel)
    }
}

/// Load, validate and build the pipeline defined in a YAML file.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<Pipeline, ConfigError> {
    let config = YamlLoader::load_pipeline_config(path)?;
    PipelineConfigBuilder::build(config)
}
