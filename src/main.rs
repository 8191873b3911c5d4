//! tock - a small batch-workflow orchestrator.
//!
//! Usage:
//!   tock run <pipeline.yaml>       Run the pipeline on its schedule until Ctrl+C
//!   tock trigger <pipeline.yaml>   Run the pipeline once now
//!   tock validate <pipeline.yaml>  Validate a pipeline definition without running
//!   tock show <pipeline.yaml>      Print the tasks in execution order

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tock::{
    DagExecutor, Event, EventBus, EventHandler, Pipeline, RunStatus, ScheduleRunner, TaskExecutor,
    TokioClock, load_pipeline,
};
use tracing::{error, info, warn};

/// tock - a small batch-workflow orchestrator
#[derive(Parser)]
#[command(name = "tock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline at every tick of its schedule
    Run {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        file: PathBuf,

        /// Maximum concurrent tasks (overrides the file)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// Stop after this many scheduled runs
        #[arg(long)]
        max_runs: Option<usize>,
    },

    /// Run the pipeline once now; exits non-zero if the run fails
    Trigger {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        file: PathBuf,

        /// Maximum concurrent tasks (overrides the file)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,
    },

    /// Validate a pipeline definition without running
    Validate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        file: PathBuf,
    },

    /// Print the pipeline and its tasks in execution order
    Show {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        file: PathBuf,
    },
}

/// Simple logging event handler that prints lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted {
                pipeline_id,
                run_id,
                ..
            } => {
                info!("Pipeline '{}' started (run: {})", pipeline_id, run_id);
            }
            Event::RunCompleted {
                pipeline_id,
                run_id,
                status,
                duration,
                ..
            } => {
                if *status == RunStatus::Success {
                    info!(
                        "Pipeline '{}' succeeded in {:?} (run: {})",
                        pipeline_id, duration, run_id
                    );
                } else {
                    error!(
                        "Pipeline '{}' failed after {:?} (run: {})",
                        pipeline_id, duration, run_id
                    );
                }
            }
            Event::TaskStarted {
                task_id, attempt, ..
            } => {
                info!("  Task '{}' started (attempt {})", task_id, attempt);
            }
            Event::TaskRetrying {
                task_id,
                attempt,
                max_attempts,
                delay,
                error,
                ..
            } => {
                warn!(
                    "  Task '{}' attempt {}/{} failed: {}; retrying in {:?}",
                    task_id, attempt, max_attempts, error, delay
                );
            }
            Event::TaskSucceeded {
                task_id,
                attempts,
                duration,
                ..
            } => {
                info!(
                    "  Task '{}' succeeded in {:?} ({} attempt(s))",
                    task_id, duration, attempts
                );
            }
            Event::TaskFailed {
                task_id,
                attempts,
                failure,
                ..
            } => {
                error!(
                    "  Task '{}' failed after {} attempt(s): {}",
                    task_id, attempts, failure
                );
            }
            Event::TaskSkipped {
                task_id, reason, ..
            } => {
                warn!("  Task '{}' skipped: {}", task_id, reason);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            concurrency,
            max_runs,
        } => {
            run_schedule(file, concurrency, max_runs).await?;
        }
        Commands::Trigger { file, concurrency } => {
            trigger_pipeline(file, concurrency).await?;
        }
        Commands::Validate { file } => {
            validate_pipeline(file)?;
        }
        Commands::Show { file } => {
            show_pipeline(file)?;
        }
    }

    Ok(())
}

/// Load a pipeline, applying a concurrency override.
fn load(file: &Path, concurrency: Option<usize>) -> Result<Pipeline, Box<dyn std::error::Error>> {
    info!("Loading pipeline from: {}", file.display());
    let mut pipeline = load_pipeline(file)?;
    if let Some(limit) = concurrency {
        pipeline = pipeline.with_concurrency_limit(limit);
    }
    Ok(pipeline)
}

/// Build an executor that logs lifecycle events.
async fn executor() -> DagExecutor {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;
    DagExecutor::new(TaskExecutor::new(Arc::new(TokioClock)).with_event_bus(event_bus))
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            token.cancel();
        }
    });
}

/// Run the pipeline on its schedule until Ctrl+C.
async fn run_schedule(
    file: PathBuf,
    concurrency: Option<usize>,
    max_runs: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load(&file, concurrency)?;
    let Some(schedule) = pipeline.schedule() else {
        return Err(format!(
            "pipeline '{}' has no schedule; use `tock trigger` to run it once",
            pipeline.id()
        )
        .into());
    };

    info!(
        "Scheduling '{}' ({}), catchup: {}, {} task(s)",
        pipeline.id(),
        schedule,
        pipeline.catchup(),
        pipeline.graph().len()
    );
    info!("Press Ctrl+C to stop");

    let mut runner = ScheduleRunner::new(Arc::new(pipeline), executor().await)?;
    if let Some(limit) = max_runs {
        runner = runner.with_run_limit(limit);
    }

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let (_handle, task) = runner.start(shutdown);
    let summary = task.await??;

    let failed = summary
        .runs
        .iter()
        .filter(|r| r.status != RunStatus::Success)
        .count();
    info!(
        "Scheduler stopped after {} run(s), {} failed",
        summary.runs.len(),
        failed
    );
    Ok(())
}

/// Run the pipeline once and report the outcome.
async fn trigger_pipeline(
    file: PathBuf,
    concurrency: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load(&file, concurrency)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!("Triggering pipeline '{}'...", pipeline.id());
    let outcome = pipeline.run_once(&executor().await, cancel).await?;

    for delivery in outcome.deliveries.failures() {
        warn!(
            "Notification '{}' was not delivered: {}",
            delivery.channel,
            delivery.error.as_deref().unwrap_or("unknown error")
        );
    }

    if outcome.is_success() {
        info!("Done!");
        Ok(())
    } else {
        for (task_id, failure) in outcome.run.failures() {
            match failure {
                Some(failure) => error!("  {}: {}", task_id, failure),
                None => error!("  {}: did not succeed", task_id),
            }
        }
        Err(format!("run {} of '{}' failed", outcome.run.run_id, pipeline.id()).into())
    }
}

/// Validate a pipeline definition without running.
fn validate_pipeline(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating pipeline: {}", file.display());

    match load_pipeline(&file) {
        Ok(pipeline) => {
            info!(
                "Pipeline '{}' ({}) is valid: {} task(s), {} notification channel(s)",
                pipeline.id(),
                pipeline.name(),
                pipeline.graph().len(),
                pipeline.fanout().len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the pipeline and its tasks in execution order.
fn show_pipeline(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_pipeline(&file)?;
    let graph = pipeline.graph();

    println!("ID: {}", pipeline.id());
    println!("  Name: {}", pipeline.name());
    match pipeline.schedule() {
        Some(schedule) => println!("  Schedule: {}", schedule),
        None => println!("  Schedule: manual only"),
    }
    println!("  Catchup: {}", pipeline.catchup());
    println!("  Concurrency limit: {}", pipeline.concurrency_limit());
    println!("  Tasks: {}", graph.len());

    for task_id in graph.topological_order()? {
        let Some(node) = graph.get(&task_id) else {
            continue;
        };
        let mut line = format!("    - {} [{}]", task_id, node.kind.label());
        if !node.dependencies.is_empty() {
            let deps: Vec<&str> = node.dependencies.iter().map(|d| d.as_str()).collect();
            line.push_str(&format!(" (depends on: {})", deps.join(", ")));
        }
        if node.retry.is_enabled() {
            line.push_str(&format!(
                " retries: {} every {:?}",
                node.retry.max_attempts, node.retry.delay
            ));
        }
        if node.best_effort {
            line.push_str(" best-effort");
        }
        println!("{}", line);
    }

    let channels = pipeline.fanout().channel_names();
    if channels.is_empty() {
        println!("  Notifications: none");
    } else {
        println!("  Notifications: {}", channels.join(", "));
    }

    Ok(())
}
