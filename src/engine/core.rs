// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - raising the cancellation signal and running the grace timer
//!
//! The core can be unit tested without any Tokio, channels, or processes.

use std::time::Duration;

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_grace_elapsed, handle_shutdown_request, handle_start, handle_task_completion,
    handle_task_retrying, CoreStep,
};
use crate::engine::shutdown::{ShutdownController, ShutdownPhase};
use crate::engine::summary::{RunRecorder, RunSummary};
use crate::engine::RuntimeEvent;
use crate::errors::Result;

/// Pure core runtime state.
///
/// This owns:
/// - the DAG scheduler
/// - the shutdown controller
/// - the recorder that builds the final [`RunSummary`]
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    shutdown: ShutdownController,
    recorder: RunRecorder,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, grace_period: Duration) -> Self {
        Self {
            scheduler,
            shutdown: ShutdownController::new(grace_period),
            recorder: RunRecorder::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.shutdown.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Admit the first tasks.
    pub fn start(&mut self) -> Result<CoreStep> {
        let step = handle_start(&mut self.scheduler, &mut self.recorder)?;
        self.after_step();
        Ok(step)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> Result<CoreStep> {
        let step = match event {
            RuntimeEvent::TaskRetrying {
                task,
                attempt,
                delay,
                error,
            } => handle_task_retrying(task, attempt, delay, error),
            RuntimeEvent::TaskCompleted { task, report } => {
                handle_task_completion(&mut self.scheduler, &mut self.recorder, task, report)?
            }
            RuntimeEvent::ShutdownRequested => handle_shutdown_request(
                &mut self.scheduler,
                &mut self.shutdown,
                &mut self.recorder,
            )?,
            RuntimeEvent::GracePeriodElapsed => {
                handle_grace_elapsed(&mut self.scheduler, &mut self.shutdown)
            }
        };
        self.after_step();
        Ok(step)
    }

    /// Build the summary from the final task states.
    pub fn finish(mut self) -> RunSummary {
        self.shutdown.finish();
        self.recorder
            .finish(self.scheduler.graph(), self.scheduler.states())
    }

    fn after_step(&mut self) {
        if self.scheduler.is_finished() {
            self.shutdown.finish();
        }
    }
}
