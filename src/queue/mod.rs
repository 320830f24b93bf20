// src/queue/mod.rs

//! Bounded worker queue for independent commands.
//!
//! Jobs are admitted in FIFO order with at most `concurrency` running at a
//! time. Each job goes through the same [`RetryPolicy`] and command runner
//! the task graph uses. A failing job has no effect on the others.
//!
//! The queue state lives in one dispatcher task (see [`dispatcher`]); the
//! [`WorkerQueue`] value only sends it messages.

mod dispatcher;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::errors::{DagrunError, Result};
use crate::exec::{CancelSignal, CommandOutput, CommandSpec, ExecFailure, RetryPolicy};

use dispatcher::{Dispatcher, QueueMessage};

/// Identifier assigned at enqueue time, increasing per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A command to run on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub command: CommandSpec,
}

impl Job {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

/// A job that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub id: JobId,
    pub attempts: u32,
    pub output: CommandOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("{id} failed after {attempts} attempt(s): {failure}")]
    Failed {
        id: JobId,
        attempts: u32,
        failure: ExecFailure,
    },

    #[error("worker queue closed before the job finished")]
    QueueClosed,
}

/// Snapshot of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
}

/// Resolves to the outcome of one enqueued job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<std::result::Result<CompletedJob, JobError>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub async fn wait(self) -> std::result::Result<CompletedJob, JobError> {
        self.rx.await.unwrap_or(Err(JobError::QueueClosed))
    }
}

/// Handle to a running dispatcher. Dropping it lets the dispatcher finish
/// the outstanding jobs and exit.
#[derive(Debug)]
pub struct WorkerQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
    next_id: AtomicU64,
    cancel: CancelSignal,
}

impl WorkerQueue {
    /// Must be called from within a Tokio runtime.
    pub fn new(concurrency: usize, policy: RetryPolicy, output_limit: usize) -> Result<Self> {
        Self::with_cancel(concurrency, policy, output_limit, CancelSignal::new())
    }

    /// Like [`new`](Self::new), with jobs observing `cancel`.
    pub fn with_cancel(
        concurrency: usize,
        policy: RetryPolicy,
        output_limit: usize,
        cancel: CancelSignal,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(DagrunError::ConfigError(
                "worker queue concurrency must be >= 1 (got 0)".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(rx, concurrency, policy, output_limit, cancel.clone());
        tokio::spawn(dispatcher.run());

        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
            cancel,
        })
    }

    pub fn enqueue(&self, job: Job) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();

        // If the dispatcher is gone `reply` is dropped and `wait` reports
        // `QueueClosed`.
        let _ = self.tx.send(QueueMessage::Enqueue { id, job, reply });

        JobHandle { id, rx }
    }

    /// Resolves once nothing is queued or running.
    pub async fn drain(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(QueueMessage::Drain(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(QueueMessage::Stats(reply)).is_err() {
            return QueueStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// The signal jobs observe; raise it to stop running jobs.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}
