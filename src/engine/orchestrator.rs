// src/engine/orchestrator.rs

//! Public entry point for running a task graph.

use tokio::sync::mpsc;
use tracing::info;

use crate::dag::{Scheduler, TaskGraph};
use crate::engine::core::CoreRuntime;
use crate::engine::events::EventListener;
use crate::engine::runtime::Runtime;
use crate::engine::shutdown::ShutdownHandle;
use crate::engine::summary::RunSummary;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::{CancelSignal, ExecSettings, ExecutorBackend, RealExecutorBackend};
use crate::types::RunSettings;

/// A validated graph, ready to run once.
///
/// ```no_run
/// # async fn demo(graph: dagrun::dag::TaskGraph) -> dagrun::errors::Result<()> {
/// use dagrun::engine::{LogListener, Orchestrator};
/// use dagrun::types::RunSettings;
///
/// let orchestrator = Orchestrator::new(graph, RunSettings::default())?;
/// let _signals = dagrun::engine::spawn_signal_listener(orchestrator.shutdown_handle());
/// let summary = orchestrator.run(LogListener).await?;
/// std::process::exit(summary.exit_code());
/// # }
/// ```
#[derive(Debug)]
pub struct Orchestrator {
    scheduler: Scheduler,
    settings: RunSettings,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    cancel: CancelSignal,
}

impl Orchestrator {
    /// Fails if the graph is invalid or the concurrency limit is 0.
    pub fn new(graph: TaskGraph, settings: RunSettings) -> Result<Self> {
        let scheduler = Scheduler::new(graph, settings.concurrency)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            scheduler,
            settings,
            event_tx,
            event_rx,
            cancel: CancelSignal::new(),
        })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Can be cloned and used from any task, before or during the run.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.event_tx.clone())
    }

    /// Sender a custom [`ExecutorBackend`] reports through.
    pub fn runtime_sender(&self) -> mpsc::UnboundedSender<RuntimeEvent> {
        self.event_tx.clone()
    }

    /// The signal running tasks must observe for shutdown to reach them.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Run every task with real processes.
    pub async fn run<L: EventListener>(self, listener: L) -> Result<RunSummary> {
        let backend = RealExecutorBackend::new(
            self.event_tx.clone(),
            ExecSettings::from(&self.settings),
            self.cancel.clone(),
        );
        self.run_with_backend(backend, listener).await
    }

    /// Run every task through `executor`.
    pub async fn run_with_backend<E, L>(self, executor: E, listener: L) -> Result<RunSummary>
    where
        E: ExecutorBackend,
        L: EventListener,
    {
        let Orchestrator {
            scheduler,
            settings,
            event_rx,
            cancel,
            ..
        } = self;

        info!(
            tasks = scheduler.graph().len(),
            concurrency = settings.concurrency,
            "starting run"
        );

        let core = CoreRuntime::new(scheduler, settings.grace_period);
        Runtime::new(core, event_rx, executor, listener, cancel)
            .run()
            .await
    }
}
