//! External command action.
//!
//! [`CommandAction`] runs an external program as a task's work: shell
//! scripts (e.g. an HDFS copy), warehouse CLIs (`hive -e "<DDL>"`) or job
//! submitters (`spark-submit app.py`).
//!
//! ```rust
//! use tock::CommandAction;
//! use std::time::Duration;
//!
//! let saving_rates = CommandAction::shell(
//!     "hdfs dfs -mkdir -p /forex && hdfs dfs -put -f files/forex_rates.json /forex",
//! );
//!
//! let forex_processing = CommandAction::builder("spark-submit")
//!     .args(["--verbose", "scripts/forex_processing.py"])
//!     .env("SPARK_HOME", "/opt/spark")
//!     .timeout(Duration::from_secs(3600))
//!     .build();
//! ```
//!
//! # Errors
//!
//! - non-zero exit: [`TaskError::CommandFailed`] with the exit code and stderr
//! - timeout: [`TaskError::Timeout`], which is transient and can be retried
//!   under [`RetryCondition::TransientOnly`](crate::RetryCondition)
//! - the program cannot be started: [`TaskError::ExecutionFailed`]
//!
//! The child process is killed when the attempt is dropped, so a cancelled
//! run does not leave it behind.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::core::context::TaskContext;
use crate::core::task::{Action, TaskError};

/// An action that executes an external command.
#[derive(Debug, Clone)]
pub struct CommandAction {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandAction {
    /// Create a new builder for a command action.
    pub fn builder(program: impl Into<String>) -> CommandActionBuilder {
        CommandActionBuilder::new(program)
    }

    /// Run `script` with `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::builder("sh").arg("-c").arg(script).build()
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the command arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment overrides.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Action for CommandAction {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("TOCK_PIPELINE", ctx.pipeline_id().as_str())
            .env("TOCK_TASK", ctx.task_id().as_str())
            .env("TOCK_RUN_ID", ctx.run_id().to_string())
            .env("TOCK_ATTEMPT", ctx.attempt().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| TaskError::Timeout(duration))?
                .map_err(|e| TaskError::ExecutionFailed(format!("{}: {e}", self.program)))?,
            None => cmd
                .output()
                .await
                .map_err(|e| TaskError::ExecutionFailed(format!("{}: {e}", self.program)))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);
        debug!(
            task = %ctx.task_id(),
            program = %self.program,
            code,
            stdout = %stdout.trim(),
            "command finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(TaskError::CommandFailed { code, stderr })
        }
    }

    fn description(&self) -> Option<String> {
        Some(format!("{} {}", self.program, self.args.join(" ")))
    }
}

/// Builder for creating `CommandAction` instances.
#[derive(Debug, Clone)]
pub struct CommandActionBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandActionBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Build the action.
    pub fn build(self) -> CommandAction {
        CommandAction {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}
