// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning processes
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation in [`task_runner`].
//!
//! - `RealExecutorBackend` is the default implementation used by
//!   [`Orchestrator`]. Every scheduled task gets its own Tokio task running
//!   [`run_task`].
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.
//!
//! Both kinds share the run's [`CancelSignal`] with the runtime, which is how
//! shutdown reaches running work.
//!
//! [`task_runner`]: super::task_runner
//! [`Orchestrator`]: crate::engine::Orchestrator

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskName};
use crate::errors::{DagrunError, Result};
use crate::exec::cancel::CancelSignal;
use crate::exec::retry::{Backoff, RetryPolicy};
use crate::exec::task_runner::run_task;
use crate::types::RunSettings;

/// Trait abstracting how scheduled tasks are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// The implementation is free to:
    /// - spawn OS processes (production)
    /// - simulate completion and emit `RuntimeEvent`s (tests)
    ///
    /// Either way, every dispatched task must eventually produce exactly one
    /// `RuntimeEvent::TaskCompleted`.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// The slice of [`RunSettings`] the executor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSettings {
    pub backoff: Backoff,
    pub output_limit: usize,
}

impl From<&RunSettings> for ExecSettings {
    fn from(settings: &RunSettings) -> Self {
        Self {
            backoff: settings.backoff,
            output_limit: settings.output_limit,
        }
    }
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    settings: ExecSettings,
    cancel: CancelSignal,
    /// At most one live execution per task name.
    active: HashMap<TaskName, JoinHandle<()>>,
}

impl RealExecutorBackend {
    pub fn new(
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
        settings: ExecSettings,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            runtime_tx,
            settings,
            cancel,
            active: HashMap::new(),
        }
    }

    fn policy_for(&self, task: &ScheduledTask) -> RetryPolicy {
        RetryPolicy::new(task.retries)
            .with_timeout(task.timeout)
            .with_backoff(self.settings.backoff)
    }

    fn spawn_one(&mut self, task: ScheduledTask) -> Result<()> {
        self.active.retain(|_, handle| !handle.is_finished());

        if self.active.contains_key(&task.name) {
            return Err(DagrunError::Other(anyhow::anyhow!(
                "task '{}' dispatched while a previous execution is still running",
                task.name
            )));
        }

        let policy = self.policy_for(&task);
        let name = task.name.clone();
        let handle = tokio::spawn(run_task(
            task,
            policy,
            self.settings.output_limit,
            self.cancel.clone(),
            self.runtime_tx.clone(),
        ));

        debug!(task = %name, "task dispatched");
        self.active.insert(name, handle);
        Ok(())
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for task in tasks {
                self.spawn_one(task)?;
            }
            Ok(())
        })
    }
}
