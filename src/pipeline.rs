//! Pipeline definition: a task graph plus its run settings.
//!
//! A [`Pipeline`] combines a validated [`TaskGraph`] with graph-level settings
//! (concurrency limit, schedule, catchup) and the notification channels that
//! receive the run summary.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::core::dag::TaskGraph;
use crate::core::run::GraphRun;
use crate::core::schedule::Schedule;
use crate::core::types::PipelineId;
use crate::execution::{DagExecutor, RunError};
use crate::notify::{DeliveryReport, NotificationChannel, NotificationFanout};

/// Concurrency limit used when none is configured.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run: GraphRun,
    pub deliveries: DeliveryReport,
}

impl PipelineOutcome {
    /// Whether the graph run succeeded. Delivery failures do not count.
    pub fn is_success(&self) -> bool {
        self.run.is_success()
    }
}

/// A named task graph with its schedule and notification channels.
#[derive(Clone)]
pub struct Pipeline {
    id: PipelineId,
    name: String,
    graph: Arc<TaskGraph>,
    concurrency_limit: usize,
    schedule: Option<Schedule>,
    catchup: bool,
    fanout: NotificationFanout,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tasks", &self.graph.len())
            .field("concurrency_limit", &self.concurrency_limit)
            .field("schedule", &self.schedule)
            .field("catchup", &self.catchup)
            .field("fanout", &self.fanout)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline around `graph`. The pipeline id is the graph id.
    pub fn new(name: impl Into<String>, graph: TaskGraph) -> Self {
        Self {
            id: graph.id().clone(),
            name: name.into(),
            graph: Arc::new(graph),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            schedule: None,
            catchup: false,
            fanout: NotificationFanout::new(),
        }
    }

    /// Set the maximum number of tasks in flight.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the schedule.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Run every missed tick instead of only the latest one.
    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    /// Append a notification channel.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.fanout.push(channel);
        self
    }

    /// Replace the notification channels.
    pub fn with_fanout(mut self, fanout: NotificationFanout) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn id(&self) -> &PipelineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn catchup(&self) -> bool {
        self.catchup
    }

    pub fn fanout(&self) -> &NotificationFanout {
        &self.fanout
    }

    /// Run the graph once, then notify every channel.
    ///
    /// Notifications go out for failed and cancelled runs too. The returned
    /// outcome carries the graph run and the per-channel delivery report.
    pub async fn run_once(
        &self,
        executor: &DagExecutor,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, RunError> {
        let span = info_span!("pipeline", pipeline = %self.id, name = %self.name);

        async {
            let run = executor
                .run_with_cancel(&self.graph, self.concurrency_limit, cancel)
                .await?;
            let deliveries = self.fanout.notify(&run).await;
            info!(
                run_id = %run.run_id,
                status = %run.status,
                channels = deliveries.deliveries.len(),
                undelivered = deliveries.failures().count(),
                "pipeline run finished"
            );
            Ok::<_, RunError>(PipelineOutcome { run, deliveries })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dag::TaskNode;
    use crate::core::run::{RunStatus, TaskState};
    use crate::core::task::FnAction;
    use crate::core::types::TaskId;
    use crate::testing::{FlakyAction, RecordingChannel};

    fn ok(id: &str) -> TaskNode {
        TaskNode::action(id, Arc::new(FnAction::new(|_| async { Ok(()) })))
    }

    #[tokio::test]
    async fn test_run_once_notifies_after_success() {
        let mut graph = TaskGraph::new("forex_data_pipeline");
        graph.add_task(ok("extract")).unwrap();
        graph.add_task(ok("load").depends_on("extract")).unwrap();

        let channel = Arc::new(RecordingChannel::new("slack"));
        let pipeline = Pipeline::new("Forex", graph).with_channel(channel.clone());

        let outcome = pipeline
            .run_once(&DagExecutor::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.deliveries.all_delivered());
        let received = channel.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, RunStatus::Success);
        assert_eq!(received[0].run_id, outcome.run.run_id);
    }

    #[tokio::test]
    async fn test_run_once_notifies_after_failure() {
        let mut graph = TaskGraph::new("forex_data_pipeline");
        graph
            .add_task(TaskNode::action("fetch", Arc::new(FlakyAction::always_failing())))
            .unwrap();
        graph.add_task(ok("store").depends_on("fetch")).unwrap();

        let broken = Arc::new(RecordingChannel::new("email").failing());
        let chat = Arc::new(RecordingChannel::new("slack"));
        let pipeline = Pipeline::new("Forex", graph)
            .with_channel(broken.clone())
            .with_channel(chat.clone());

        let outcome = pipeline
            .run_once(&DagExecutor::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(
            outcome.run.state_of(&TaskId::new("store")),
            Some(TaskState::Skipped)
        );
        assert_eq!(outcome.deliveries.failures().count(), 1);
        assert_eq!(chat.received().await.len(), 1);
        assert_eq!(broken.received().await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected_at_run() {
        let mut graph = TaskGraph::new("p");
        graph.add_task(ok("a")).unwrap();
        let pipeline = Pipeline::new("p", graph).with_concurrency_limit(0);

        let err = pipeline
            .run_once(&DagExecutor::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::InvalidConcurrency(0)));
    }

    #[test]
    fn test_defaults() {
        let pipeline = Pipeline::new("Forex", TaskGraph::new("forex_data_pipeline"));

        assert_eq!(pipeline.id().as_str(), "forex_data_pipeline");
        assert_eq!(pipeline.concurrency_limit(), DEFAULT_CONCURRENCY_LIMIT);
        assert!(pipeline.schedule().is_none());
        assert!(!pipeline.catchup());
        assert!(pipeline.fanout().is_empty());
    }
}
