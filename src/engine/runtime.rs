// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::errors::Result;
use crate::exec::{CancelSignal, ExecutorBackend};

use super::core::CoreRuntime;
use super::events::EventListener;
use super::summary::RunSummary;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the DAG scheduler in response to `RuntimeEvent`s,
/// and delegates actual command execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching tasks to the executor, raising the cancellation
/// signal and running the shutdown grace timer.
///
/// It is the only place task state changes, so no locking is involved.
pub struct Runtime<E: ExecutorBackend, L: EventListener> {
    core: CoreRuntime,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    executor: E,
    listener: L,
    cancel: CancelSignal,
    grace_deadline: Option<Instant>,
}

impl<E: ExecutorBackend, L: EventListener> fmt::Debug for Runtime<E, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("grace_deadline", &self.grace_deadline)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend, L: EventListener> Runtime<E, L> {
    /// `cancel` must be the signal the executor's running tasks observe.
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        executor: E,
        listener: L,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            listener,
            cancel,
            grace_deadline: None,
        }
    }

    /// Main event loop.
    ///
    /// - Admits the first tasks.
    /// - Consumes `RuntimeEvent`s from `event_rx`, plus the grace timer.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core.
    ///
    /// Returns once every task is terminal.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!("dagrun runtime started");

        let step = self.core.start()?;
        let mut keep_running = self.execute_step(step).await?;

        while keep_running {
            let deadline = self.grace_deadline;

            let event = tokio::select! {
                maybe = self.event_rx.recv() => match maybe {
                    Some(e) => e,
                    None => {
                        warn!("runtime event channel closed with tasks outstanding; exiting");
                        break;
                    }
                },
                _ = wait_for_deadline(deadline) => {
                    self.grace_deadline = None;
                    RuntimeEvent::GracePeriodElapsed
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event)?;
            keep_running = self.execute_step(step).await?;
        }

        let summary = self.core.finish();
        info!(%summary, "runtime exiting");
        Ok(summary)
    }

    async fn execute_step(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::Emit(event) => {
                self.listener.on_event(&event);
            }
            CoreCommand::TerminateRunning { grace } => {
                info!(grace_ms = grace.as_millis() as u64, "terminating running tasks");
                self.cancel.request_terminate();
                self.grace_deadline = Some(Instant::now() + grace);
            }
            CoreCommand::ForceKill => {
                warn!("force-killing running tasks");
                self.cancel.request_kill();
                self.grace_deadline = None;
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        debug!(?names, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
