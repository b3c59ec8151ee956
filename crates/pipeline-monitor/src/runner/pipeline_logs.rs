//! Per-pipeline logs: a backlog plus fan-out of live lines to followers.
//!
//! A single task per pipeline owns the [`LogsBuffer`] and the followers. It
//! receives lines from the log source of the current deployment and from the
//! monitor itself (transitions), and follow requests from readers.
//!
//! A follower first receives the backlog. It then receives live lines for as
//! long as a log source is active. When the source ends (shutdown or lost
//! connection), all followers are dropped so that their streams end; they
//! need to follow again once a new deployment is up.

use crate::error::ManagerError;
use crate::runner::error::RunnerError;
use crate::runner::interaction::PipelineTransport;
use crate::runner::logs_buffer::{LogsBuffer, LogsLimits};
use futures_util::{Stream, StreamExt};
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;

/// Maximum number of outstanding log follow requests that have
/// not yet been received by the logs task.
pub const MAXIMUM_OUTSTANDING_LOG_FOLLOW_REQUESTS: usize = 100;

/// Channel capacity of each follower. A follower that falls this far behind
/// is dropped in order to not slow down others.
pub const MAXIMUM_BUFFERED_LINES_PER_FOLLOWER: usize = 100_000;

/// Capacity of the channel feeding the logs task.
const MAXIMUM_PENDING_LOG_MESSAGES: usize = 10_000;

/// Final line of every follow stream.
pub const LOGS_ENDED_LINE: &str = "Logs have ended";

#[derive(Debug)]
pub(crate) enum LogMessage {
    SourceStarted,
    Line(String),
    SourceEnded,
}

/// Handle to the logs task of one pipeline. Dropping it ends the task.
pub(crate) struct PipelineLogs {
    pipeline_name: String,
    follow_request_sender: Sender<Sender<String>>,
    message_sender: Sender<LogMessage>,
    task: JoinHandle<()>,
}

impl Drop for PipelineLogs {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl PipelineLogs {
    pub(crate) fn start(pipeline_name: &str, limits: LogsLimits) -> Self {
        let (follow_request_sender, follow_request_receiver) =
            channel(MAXIMUM_OUTSTANDING_LOG_FOLLOW_REQUESTS);
        let (message_sender, message_receiver) = channel(MAXIMUM_PENDING_LOG_MESSAGES);
        let task = tokio::spawn(logs_task(
            pipeline_name.to_string(),
            limits,
            follow_request_receiver,
            message_receiver,
        ));
        Self {
            pipeline_name: pipeline_name.to_string(),
            follow_request_sender,
            message_sender,
            task,
        }
    }

    /// Adds a line without waiting. Dropped if the task is saturated.
    pub(crate) fn push_line(&self, line: String) {
        if let Err(TrySendError::Full(_)) = self.message_sender.try_send(LogMessage::Line(line)) {
            debug!(
                "Logs of pipeline {} are saturated: dropped a line",
                self.pipeline_name
            );
        }
    }

    /// Spawns the task which forwards the log stream of a deployment.
    pub(crate) fn attach_source(
        &self,
        transport: Arc<dyn PipelineTransport>,
        location: String,
    ) -> JoinHandle<()> {
        let pipeline_name = self.pipeline_name.clone();
        let sender = self.message_sender.clone();
        tokio::spawn(async move {
            if sender.send(LogMessage::SourceStarted).await.is_err() {
                return;
            }
            match transport.log_lines(&pipeline_name, &location).await {
                Ok(mut lines) => {
                    while let Some(line) = lines.next().await {
                        if sender.send(LogMessage::Line(line)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!("Unable to follow the logs of pipeline {pipeline_name}: {e}"),
            }
            let _ = sender.send(LogMessage::SourceEnded).await;
        })
    }

    /// Marks the current log source as ended, e.g., after it was aborted.
    pub(crate) async fn detach_source(&self) {
        let _ = self.message_sender.send(LogMessage::SourceEnded).await;
    }

    /// Follows the logs: backlog first, then live lines, then a final
    /// [`LOGS_ENDED_LINE`].
    pub(crate) fn follow(&self) -> Result<impl Stream<Item = String>, ManagerError> {
        let (sender, receiver) = channel::<String>(MAXIMUM_BUFFERED_LINES_PER_FOLLOWER);
        match self.follow_request_sender.try_send(sender) {
            Ok(()) => Ok(logs_stream(receiver)),
            Err(TrySendError::Full(_)) => {
                error!("Unable to follow pipeline logs because the request channel is full");
                Err(RunnerError::LogFollowRequestChannelFull.into())
            }
            Err(TrySendError::Closed(_)) => {
                error!("Unable to follow pipeline logs because the request channel is closed");
                Err(RunnerError::LogFollowRequestChannelClosed.into())
            }
        }
    }
}

fn logs_stream(mut receiver: Receiver<String>) -> impl Stream<Item = String> {
    async_stream::stream! {
        while let Some(line) = receiver.recv().await {
            yield line;
        }
        yield LOGS_ENDED_LINE.to_string();
    }
}

async fn logs_task(
    pipeline_name: String,
    limits: LogsLimits,
    mut follow_requests: Receiver<Sender<String>>,
    mut messages: Receiver<LogMessage>,
) {
    let mut buffer = LogsBuffer::new(limits);
    let mut followers: Vec<Sender<String>> = vec![];
    let mut source_active = false;
    loop {
        tokio::select! {
            request = follow_requests.recv() => {
                let Some(follower) = request else {
                    break;
                };
                let caught_up = buffer
                    .lines()
                    .all(|line| follower.try_send(line.clone()).is_ok());
                if caught_up && source_active {
                    followers.push(follower);
                }
            }
            message = messages.recv() => {
                match message {
                    Some(LogMessage::SourceStarted) => source_active = true,
                    Some(LogMessage::Line(line)) => {
                        followers.retain(|follower| follower.try_send(line.clone()).is_ok());
                        buffer.append(line);
                    }
                    Some(LogMessage::SourceEnded) => {
                        source_active = false;
                        followers.clear();
                    }
                    None => break,
                }
            }
        }
    }
    debug!("Logs of pipeline {pipeline_name} are no longer served");
}
