// tests/core_runtime.rs

//! The pure core fed by hand, without Tokio or processes.

use std::error::Error;
use std::time::Duration;

use dagrun::dag::Scheduler;
use dagrun::engine::{
    CoreCommand, CoreRuntime, CoreStep, EventKind, FailureReason, RuntimeEvent, ShutdownPhase,
};
use dagrun::errors::DagrunError;
use dagrun::exec::{CommandOutput, CommandStatus, ExecFailure, TaskReport};
use dagrun_test_utils::builders::TaskGraphBuilder;

type TestResult = Result<(), Box<dyn Error>>;

const GRACE: Duration = Duration::from_secs(2);

fn core(concurrency: usize) -> Result<CoreRuntime, Box<dyn Error>> {
    let graph = TaskGraphBuilder::new()
        .with_task("install", &[])
        .with_task("lint", &["install"])
        .with_task("build", &["install"])
        .with_task("deploy", &["lint", "build"])
        .build();
    Ok(CoreRuntime::new(Scheduler::new(graph, concurrency)?, GRACE))
}

fn output(code: i32) -> CommandOutput {
    CommandOutput {
        status: CommandStatus::Exited(code),
        stdout: String::new(),
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

fn completed(task: &str, code: i32) -> RuntimeEvent {
    RuntimeEvent::TaskCompleted {
        task: task.to_string(),
        report: TaskReport {
            attempts: 1,
            result: output(code).into_result(),
            duration: Duration::from_millis(1),
        },
    }
}

/// (task, kind) of every emitted event, then the dispatched names.
fn describe(step: &CoreStep) -> (Vec<(String, EventKind)>, Vec<String>) {
    let mut events = Vec::new();
    let mut dispatched = Vec::new();
    for command in &step.commands {
        match command {
            CoreCommand::Emit(e) => events.push((e.task.clone(), e.kind)),
            CoreCommand::DispatchTasks(tasks) => {
                dispatched.extend(tasks.iter().map(|t| t.name.clone()))
            }
            _ => {}
        }
    }
    (events, dispatched)
}

#[test]
fn start_emits_started_before_dispatch() -> TestResult {
    let mut core = core(2)?;
    let step = core.start()?;

    match step.commands.first() {
        Some(CoreCommand::Emit(e)) => {
            assert_eq!(e.task, "install");
            assert_eq!(e.kind, EventKind::Started);
            assert_eq!(e.attempt, 1);
        }
        other => panic!("expected Emit, got {other:?}"),
    }
    assert!(matches!(step.commands.last(), Some(CoreCommand::DispatchTasks(_))));
    assert!(step.keep_running);
    Ok(())
}

#[test]
fn completion_emits_own_event_then_skips_then_starts() -> TestResult {
    let mut core = core(2)?;
    core.start()?;

    let step = core.step(completed("install", 0))?;
    let (events, dispatched) = describe(&step);
    assert_eq!(
        events,
        vec![
            ("install".to_string(), EventKind::Succeeded),
            ("lint".to_string(), EventKind::Started),
            ("build".to_string(), EventKind::Started),
        ]
    );
    assert_eq!(dispatched, vec!["lint", "build"]);

    let step = core.step(completed("lint", 2))?;
    let (events, dispatched) = describe(&step);
    assert_eq!(
        events,
        vec![
            ("lint".to_string(), EventKind::Failed),
            ("deploy".to_string(), EventKind::Skipped),
        ]
    );
    assert!(dispatched.is_empty());
    assert!(step.keep_running, "build still running");

    let step = core.step(completed("build", 0))?;
    assert!(!step.keep_running);
    assert_eq!(core.shutdown_phase(), ShutdownPhase::Terminated);

    let summary = core.finish();
    assert_eq!(summary.succeeded, vec!["install", "build"]);
    assert_eq!(summary.failed, vec!["lint"]);
    assert_eq!(summary.skipped, vec!["deploy"]);
    assert_eq!(
        summary.task("lint").and_then(|t| t.failure.clone()),
        Some(FailureReason::NonZeroExit(2))
    );
    Ok(())
}

#[test]
fn stray_completion_is_rejected_without_touching_the_record() -> TestResult {
    let mut core = core(2)?;
    core.start()?;
    core.step(completed("install", 0))?;

    let duplicate = RuntimeEvent::TaskCompleted {
        task: "install".to_string(),
        report: TaskReport {
            attempts: 3,
            result: Ok(CommandOutput {
                stdout: "stray".to_string(),
                ..output(0)
            }),
            duration: Duration::from_secs(9),
        },
    };
    assert!(matches!(
        core.step(duplicate),
        Err(DagrunError::InvalidTransition { .. })
    ));
    assert!(matches!(
        core.step(completed("deploy", 1)),
        Err(DagrunError::InvalidTransition { .. })
    ));

    let summary = core.finish();
    let install = summary.task("install").unwrap();
    assert_eq!(install.attempts, 1);
    assert_eq!(install.stdout, "");
    assert!(summary.task("deploy").and_then(|t| t.failure.clone()).is_none());
    Ok(())
}

#[test]
fn retry_notice_only_emits_an_event() -> TestResult {
    let mut core = core(1)?;
    core.start()?;

    let step = core.step(RuntimeEvent::TaskRetrying {
        task: "install".into(),
        attempt: 1,
        delay: Duration::from_millis(200),
        error: "exited with status 1".into(),
    })?;

    assert_eq!(step.commands.len(), 1);
    match &step.commands[0] {
        CoreCommand::Emit(e) => {
            assert_eq!(e.kind, EventKind::Retrying);
            assert_eq!(e.attempt, 1);
            let detail = e.detail.as_deref().unwrap_or("");
            assert!(detail.contains("200ms"), "detail was {detail:?}");
        }
        other => panic!("expected Emit, got {other:?}"),
    }
    assert_eq!(core.scheduler().running_tasks(), vec!["install"]);
    Ok(())
}

#[test]
fn shutdown_skips_waiting_and_terminates_running() -> TestResult {
    let mut core = core(1)?;
    core.start()?;

    let step = core.step(RuntimeEvent::ShutdownRequested)?;
    let (events, dispatched) = describe(&step);
    assert_eq!(
        events,
        vec![
            ("lint".to_string(), EventKind::Skipped),
            ("build".to_string(), EventKind::Skipped),
            ("deploy".to_string(), EventKind::Skipped),
        ]
    );
    assert!(dispatched.is_empty());
    assert_eq!(
        step.commands.last(),
        Some(&CoreCommand::TerminateRunning { grace: GRACE })
    );
    assert_eq!(core.shutdown_phase(), ShutdownPhase::ShuttingDown);

    let step = core.step(RuntimeEvent::ShutdownRequested)?;
    assert_eq!(step.commands, vec![CoreCommand::ForceKill]);

    // A third request changes nothing.
    let step = core.step(RuntimeEvent::ShutdownRequested)?;
    assert!(step.commands.is_empty());

    let step = core.step(RuntimeEvent::TaskCompleted {
        task: "install".into(),
        report: TaskReport {
            attempts: 1,
            result: Err(ExecFailure::Cancelled(CommandOutput {
                status: CommandStatus::Cancelled { forced: true },
                ..output(0)
            })),
            duration: Duration::from_millis(1),
        },
    })?;
    assert!(!step.keep_running);

    let summary = core.finish();
    assert!(summary.interrupted);
    assert_eq!(summary.failed, vec!["install"]);
    assert_eq!(
        summary.task("install").and_then(|t| t.failure.clone()),
        Some(FailureReason::ForcedTermination)
    );
    Ok(())
}

#[test]
fn grace_elapsed_forces_only_during_shutdown() -> TestResult {
    let mut core = core(1)?;
    core.start()?;

    let step = core.step(RuntimeEvent::GracePeriodElapsed)?;
    assert!(step.commands.is_empty());

    core.step(RuntimeEvent::ShutdownRequested)?;
    let step = core.step(RuntimeEvent::GracePeriodElapsed)?;
    assert_eq!(step.commands, vec![CoreCommand::ForceKill]);
    Ok(())
}

#[test]
fn shutdown_with_nothing_running_finishes_immediately() -> TestResult {
    let mut core = core(1)?;
    core.start()?;
    core.step(completed("install", 1))?;

    // install failed, so everything else was skipped and the run is over.
    assert!(core.is_finished());
    let step = core.step(RuntimeEvent::ShutdownRequested)?;
    assert!(step.commands.is_empty());
    assert!(!step.keep_running);
    Ok(())
}
