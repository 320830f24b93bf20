// src/queue/dispatcher.rs

//! The actor that owns the queue state.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::exec::{run_command, CancelSignal, ExecFailure, RetryNotice, RetryPolicy};

use super::{CompletedJob, Job, JobError, JobId, QueueStats};

type Reply = oneshot::Sender<Result<CompletedJob, JobError>>;

pub(super) enum QueueMessage {
    Enqueue { id: JobId, job: Job, reply: Reply },
    Drain(oneshot::Sender<()>),
    Stats(oneshot::Sender<QueueStats>),
}

pub(super) struct Dispatcher {
    commands: mpsc::UnboundedReceiver<QueueMessage>,
    done_tx: mpsc::UnboundedSender<JobId>,
    done_rx: mpsc::UnboundedReceiver<JobId>,
    backlog: VecDeque<(JobId, Job, Reply)>,
    running: usize,
    completed: u64,
    concurrency: usize,
    policy: RetryPolicy,
    output_limit: usize,
    cancel: CancelSignal,
    drain_waiters: Vec<oneshot::Sender<()>>,
    /// All `WorkerQueue` handles are gone.
    closed: bool,
}

impl Dispatcher {
    pub(super) fn new(
        commands: mpsc::UnboundedReceiver<QueueMessage>,
        concurrency: usize,
        policy: RetryPolicy,
        output_limit: usize,
        cancel: CancelSignal,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            commands,
            done_tx,
            done_rx,
            backlog: VecDeque::new(),
            running: 0,
            completed: 0,
            concurrency,
            policy,
            output_limit,
            cancel,
            drain_waiters: Vec::new(),
            closed: false,
        }
    }

    pub(super) async fn run(mut self) {
        info!(concurrency = self.concurrency, "worker queue started");

        loop {
            tokio::select! {
                msg = self.commands.recv(), if !self.closed => match msg {
                    Some(msg) => self.handle(msg),
                    None => {
                        debug!("all queue handles dropped");
                        self.closed = true;
                    }
                },
                Some(id) = self.done_rx.recv() => {
                    self.running -= 1;
                    self.completed += 1;
                    debug!(job = %id, running = self.running, "job finished");
                }
            }

            self.admit();

            if self.is_idle() {
                for waiter in self.drain_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if self.closed {
                    break;
                }
            }
        }

        info!(completed = self.completed, "worker queue stopped");
    }

    fn handle(&mut self, msg: QueueMessage) {
        match msg {
            QueueMessage::Enqueue { id, job, reply } => {
                debug!(job = %id, cmd = %job.command, "job enqueued");
                self.backlog.push_back((id, job, reply));
            }
            QueueMessage::Drain(waiter) => self.drain_waiters.push(waiter),
            QueueMessage::Stats(reply) => {
                let _ = reply.send(QueueStats {
                    queued: self.backlog.len(),
                    running: self.running,
                    completed: self.completed,
                });
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.running == 0
    }

    fn admit(&mut self) {
        while self.running < self.concurrency {
            let Some((id, job, reply)) = self.backlog.pop_front() else {
                break;
            };
            self.running += 1;
            self.spawn_job(id, job, reply);
        }
    }

    fn spawn_job(&self, id: JobId, job: Job, reply: Reply) {
        let policy = self.policy;
        let output_limit = self.output_limit;
        let cancel = self.cancel.clone();
        let done_tx = self.done_tx.clone();

        debug!(job = %id, "job started");

        tokio::spawn(async move {
            let command = &job.command;
            let cancel_ref = &cancel;

            let outcome = policy
                .run(
                    &cancel,
                    |notice: RetryNotice<'_, ExecFailure>| {
                        warn!(
                            job = %id,
                            attempt = notice.attempt,
                            delay_ms = notice.delay.as_millis() as u64,
                            error = %notice.error,
                            "job attempt failed; retrying"
                        );
                    },
                    |_| async move {
                        run_command(command, output_limit, cancel_ref)
                            .await?
                            .into_result()
                    },
                )
                .await;

            let result = match outcome.result {
                Ok(output) => Ok(CompletedJob {
                    id,
                    attempts: outcome.attempts,
                    output,
                }),
                Err(failure) => {
                    warn!(job = %id, attempts = outcome.attempts, error = %failure, "job failed");
                    Err(JobError::Failed {
                        id,
                        attempts: outcome.attempts,
                        failure,
                    })
                }
            };

            // Reply first so `wait` resolves before `drain` does.
            let _ = reply.send(result);
            let _ = done_tx.send(id);
        });
    }
}
