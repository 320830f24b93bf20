// src/engine/mod.rs

//! Orchestration engine for dagrun.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the shutdown controller
//! - the main runtime event loop that reacts to:
//!   - retry notices and completions from running tasks
//!   - interruption requests (Ctrl-C, SIGTERM, [`ShutdownHandle`])
//!   - the grace-period timer
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`orchestrator`] wires both to the real
//! process executor.

use std::fmt;
use std::time::Duration;

use crate::exec::{ExecFailure, TaskReport};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Why a task ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The executable could not be started.
    LaunchError(String),
    /// The last attempt exited with this non-zero code.
    NonZeroExit(i32),
    /// The last attempt hit the task's timeout.
    Timeout(Duration),
    /// Stopped by the cooperative termination signal during shutdown.
    Interrupted,
    /// Killed after the grace period, or by a second interruption.
    ForcedTermination,
}

impl From<&ExecFailure> for FailureReason {
    fn from(failure: &ExecFailure) -> Self {
        match failure {
            ExecFailure::Launch { message, .. } => FailureReason::LaunchError(message.clone()),
            ExecFailure::NonZeroExit(out) => {
                FailureReason::NonZeroExit(out.exit_code().unwrap_or(-1))
            }
            ExecFailure::Timeout(after) => FailureReason::Timeout(*after),
            ExecFailure::Cancelled(out) => match out.status {
                crate::exec::CommandStatus::Cancelled { forced: true } => {
                    FailureReason::ForcedTermination
                }
                _ => FailureReason::Interrupted,
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::LaunchError(msg) => write!(f, "launch error: {msg}"),
            FailureReason::NonZeroExit(code) => write!(f, "exited with status {code}"),
            FailureReason::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            FailureReason::Interrupted => write!(f, "interrupted by shutdown"),
            FailureReason::ForcedTermination => write!(f, "forced termination"),
        }
    }
}

/// Outcome of a task execution (all attempts) for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(FailureReason),
}

impl TaskOutcome {
    pub fn from_report(report: &TaskReport) -> Self {
        match &report.result {
            Ok(_) => TaskOutcome::Succeeded,
            Err(failure) => TaskOutcome::Failed(FailureReason::from(failure)),
        }
    }
}

/// Events flowing into the runtime loop.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An attempt failed and the task will be retried after `delay`.
    TaskRetrying {
        task: TaskName,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// All attempts of a task are done.
    TaskCompleted { task: TaskName, report: TaskReport },
    /// Interruption requested (Ctrl-C, SIGTERM or a [`ShutdownHandle`]).
    ShutdownRequested,
    /// The shutdown grace period ran out.
    GracePeriodElapsed,
}

pub mod core;
pub mod event_handlers;
pub mod events;
pub mod orchestrator;
pub mod runtime;
pub mod shutdown;
pub mod summary;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use events::{EventKind, EventListener, LogListener, TaskEvent};
pub use orchestrator::Orchestrator;
pub use runtime::Runtime;
pub use shutdown::{
    spawn_signal_listener, ShutdownAction, ShutdownController, ShutdownHandle, ShutdownPhase,
};
pub use summary::{RunRecorder, RunSummary, TaskResult};
