//! Handle for controlling a running schedule loop.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineOutcome;

use super::types::{RunnerCommand, SchedulerError};

/// Buffer size for the command channel between RunnerHandle and the loop.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling a [`ScheduleRunner`](super::ScheduleRunner) started
/// with [`start`](super::ScheduleRunner::start).
#[derive(Clone)]
pub struct RunnerHandle {
    pub(crate) command_tx: mpsc::Sender<RunnerCommand>,
    pub(crate) shutdown: CancellationToken,
}

impl RunnerHandle {
    /// Run the pipeline now, outside the schedule, and wait for the outcome.
    pub async fn trigger(&self) -> Result<PipelineOutcome, SchedulerError> {
        let (response, response_rx) = oneshot::channel();
        self.command_tx
            .send(RunnerCommand::Trigger { response })
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to send trigger command".into()))?;

        response_rx
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to receive trigger response".into()))?
    }

    /// Stop the loop. A run in flight is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
