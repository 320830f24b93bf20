// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use tracing::{info, warn};

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::events::TaskEvent;
use crate::engine::shutdown::{ShutdownAction, ShutdownController};
use crate::engine::summary::RunRecorder;
use crate::engine::TaskName;
use crate::errors::Result;
use crate::exec::TaskReport;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Hand this event to the listener.
    Emit(TaskEvent),
    /// Ask running processes to stop and arm the grace timer.
    TerminateRunning { grace: Duration },
    /// Kill everything still running.
    ForceKill,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Initial admission of the run.
pub fn handle_start(scheduler: &mut Scheduler, recorder: &mut RunRecorder) -> Result<CoreStep> {
    let mut commands = Vec::new();
    let step = scheduler.step_admit()?;
    push_scheduler_step(step, recorder, &mut commands);

    Ok(finish_step(scheduler, commands))
}

/// A failed attempt that will be retried.
pub fn handle_task_retrying(
    task: TaskName,
    attempt: u32,
    delay: Duration,
    error: String,
) -> CoreStep {
    CoreStep {
        commands: vec![CoreCommand::Emit(TaskEvent::retrying(
            &task, attempt, delay, &error,
        ))],
        keep_running: true,
    }
}

/// A task finished all its attempts.
///
/// Emits the task's own event first, then skips of its dependents, then
/// starts of newly admitted tasks.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    recorder: &mut RunRecorder,
    task: TaskName,
    report: TaskReport,
) -> Result<CoreStep> {
    let outcome = crate::engine::TaskOutcome::from_report(&report);
    // A stray completion must fail before it touches the record.
    let step = scheduler.step_completion(&task, outcome)?;

    recorder.record_completion(&task, &report);
    let mut commands = vec![CoreCommand::Emit(TaskEvent::completed(&task, &report))];
    push_scheduler_step(step, recorder, &mut commands);

    Ok(finish_step(scheduler, commands))
}

/// An interruption arrived (signal or [`ShutdownHandle`]).
///
/// [`ShutdownHandle`]: crate::engine::ShutdownHandle
pub fn handle_shutdown_request(
    scheduler: &mut Scheduler,
    shutdown: &mut ShutdownController,
    recorder: &mut RunRecorder,
) -> Result<CoreStep> {
    let mut commands = Vec::new();

    match shutdown.on_interrupt() {
        ShutdownAction::BeginGraceful { grace } => {
            info!(
                running = scheduler.running_count(),
                grace_ms = grace.as_millis() as u64,
                "shutdown requested; no new tasks will start"
            );
            recorder.mark_interrupted();
            let step = scheduler.stop_admission()?;
            push_scheduler_step(step, recorder, &mut commands);

            if scheduler.running_count() > 0 {
                commands.push(CoreCommand::TerminateRunning { grace });
            }
        }
        ShutdownAction::ForceKill => {
            warn!("second shutdown request; force-killing running tasks");
            commands.push(CoreCommand::ForceKill);
        }
        ShutdownAction::Ignore => {}
    }

    Ok(finish_step(scheduler, commands))
}

/// The grace period ran out.
pub fn handle_grace_elapsed(
    scheduler: &mut Scheduler,
    shutdown: &mut ShutdownController,
) -> CoreStep {
    let mut commands = Vec::new();

    if shutdown.on_grace_elapsed() == ShutdownAction::ForceKill && scheduler.running_count() > 0 {
        warn!(
            running = ?scheduler.running_tasks(),
            "grace period elapsed; force-killing running tasks"
        );
        commands.push(CoreCommand::ForceKill);
    }

    finish_step(scheduler, commands)
}

/// Turn a scheduler step into events and a dispatch, in that order.
fn push_scheduler_step(
    step: SchedulerStep,
    recorder: &mut RunRecorder,
    commands: &mut Vec<CoreCommand>,
) {
    for (task, cause) in &step.newly_skipped {
        recorder.record_skip(task, cause);
        commands.push(CoreCommand::Emit(TaskEvent::skipped(task, cause)));
    }

    for task in &step.newly_scheduled {
        commands.push(CoreCommand::Emit(TaskEvent::started(&task.name)));
    }

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }
}

fn finish_step(scheduler: &Scheduler, commands: Vec<CoreCommand>) -> CoreStep {
    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}
