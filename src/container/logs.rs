//! Concurrent container log following.
//!
//! A [`LogFollower`] task streams a container's combined stdout/stderr into a
//! [`LogSink`] until the stream closes, the stream fails, or its cancellation
//! token fires. The runtime demultiplexes the framed stream; the follower only
//! routes each chunk to the matching writer.

use crate::container::{ContainerError, ContainerRuntime, LogChunk, Result};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination for a container's output.
pub struct LogSink {
    stdout: Box<dyn AsyncWrite + Send + Unpin>,
    stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl LogSink {
    pub fn new<O, E>(stdout: O, stderr: E) -> Self
    where
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// The host process's stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdout(), tokio::io::stderr())
    }

    /// Drop everything.
    pub fn discard() -> Self {
        Self::new(tokio::io::sink(), tokio::io::sink())
    }

    async fn write(&mut self, chunk: &LogChunk) -> std::io::Result<()> {
        let writer = match chunk {
            LogChunk::StdOut(_) | LogChunk::Console(_) => &mut self.stdout,
            LogChunk::StdErr(_) => &mut self.stderr,
        };
        writer.write_all(chunk.bytes()).await?;
        writer.flush().await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.stdout.flush().await?;
        self.stderr.flush().await
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

/// What a finished follower saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowSummary {
    /// Bytes routed to the stdout writer (including TTY output)
    pub stdout_bytes: u64,
    /// Bytes routed to the stderr writer
    pub stderr_bytes: u64,
    /// Whether the follower stopped because it was cancelled
    pub cancelled: bool,
}

/// Spawns log-following tasks.
pub struct LogFollower;

impl LogFollower {
    /// Start following `container` on a new task.
    ///
    /// The task runs until the log stream ends or `token` is cancelled; the caller
    /// is not blocked.
    pub fn spawn(
        runtime: Arc<dyn ContainerRuntime>,
        container: &str,
        sink: LogSink,
        token: CancellationToken,
    ) -> FollowHandle {
        let container = container.to_string();
        let task = tokio::spawn(follow(
            runtime,
            container.clone(),
            sink,
            token.clone(),
        ));
        FollowHandle {
            container,
            token,
            task,
        }
    }
}

async fn follow(
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    mut sink: LogSink,
    token: CancellationToken,
) -> Result<FollowSummary> {
    debug!("Following logs of {}", container);
    let mut stream = runtime.follow_logs(&container);
    let mut summary = FollowSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                summary.cancelled = true;
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let len = chunk.bytes().len() as u64;
                sink.write(&chunk).await?;
                match chunk {
                    LogChunk::StdErr(_) => summary.stderr_bytes += len,
                    _ => summary.stdout_bytes += len,
                }
            }
            Some(Err(e)) => {
                warn!("Log stream for {} failed: {}", container, e);
                let _ = sink.flush().await;
                return Err(match e {
                    ContainerError::LogStreamError(msg) => ContainerError::LogStreamError(msg),
                    other => ContainerError::LogStreamError(format!("{}: {}", container, other)),
                });
            }
            None => break,
        }
    }

    sink.flush().await?;
    debug!(
        "Stopped following {} (cancelled={})",
        container, summary.cancelled
    );
    Ok(summary)
}

/// Handle to a running log follower.
#[derive(Debug)]
pub struct FollowHandle {
    container: String,
    token: CancellationToken,
    task: JoinHandle<Result<FollowSummary>>,
}

impl FollowHandle {
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Ask the follower to stop; it exits at its next poll.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the follower to end on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::LogStreamError`] if the stream broke or the task
    /// panicked, or an IO error if the sink could not be written.
    pub async fn join(self) -> Result<FollowSummary> {
        self.task.await.map_err(|e| {
            ContainerError::LogStreamError(format!(
                "log follower for {} did not complete: {}",
                self.container, e
            ))
        })?
    }

    /// Cancel and wait.
    ///
    /// # Errors
    ///
    /// Same as [`FollowHandle::join`].
    pub async fn shutdown(self) -> Result<FollowSummary> {
        self.cancel();
        self.join().await
    }
}
