// tests/shutdown_behaviour.rs

//! Two-stage shutdown against real process groups.

#![cfg(unix)]

use std::error::Error;
use std::time::{Duration, Instant};

use dagrun::engine::{FailureReason, Orchestrator, RunSummary, TaskEvent};
use dagrun::types::RunSettings;
use dagrun_test_utils::builders::{shell_task, TaskGraphBuilder};
use dagrun_test_utils::{init_tracing, with_timeout};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

/// Run `graph`, sending one shutdown request per entry of `requests_after`.
async fn run_with_interrupts(
    builder: TaskGraphBuilder,
    grace: Duration,
    requests_after: &[u64],
) -> Result<RunSummary, Box<dyn Error>> {
    let settings = RunSettings::default()
        .with_concurrency(1)
        .with_grace_period(grace);
    let orchestrator = Orchestrator::new(builder.build(), settings)?;
    let handle = orchestrator.shutdown_handle();

    let delays = requests_after.to_vec();
    tokio::spawn(async move {
        for ms in delays {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            handle.request();
        }
    });

    Ok(with_timeout(orchestrator.run(|_: &TaskEvent| {})).await?)
}

#[tokio::test]
async fn cooperative_task_finishes_cleanly_after_one_interrupt() -> TestResult {
    init_tracing();

    let builder = TaskGraphBuilder::new()
        .with_def(shell_task(
            "server",
            "trap 'echo cleaned up; exit 0' TERM; sleep 30 & wait",
        ))
        .with_def(shell_task("after", "echo never").depends_on(["server"]))
        .with_def(shell_task("queued", "echo never"));

    let started = Instant::now();
    let summary = run_with_interrupts(builder, Duration::from_secs(5), &[300]).await?;

    assert!(started.elapsed() < Duration::from_secs(4), "no forced kill needed");
    assert!(summary.interrupted);
    assert_eq!(summary.succeeded, vec!["server"]);
    assert_eq!(summary.task("server").unwrap().stdout, "cleaned up\n");
    assert_eq!(summary.skipped, vec!["after", "queued"]);
    assert_eq!(summary.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn task_killed_by_terminate_is_interrupted() -> TestResult {
    init_tracing();

    let builder = TaskGraphBuilder::new().with_def(shell_task("sleeper", "sleep 30"));
    let summary = run_with_interrupts(builder, Duration::from_secs(5), &[300]).await?;

    assert_eq!(
        summary.task("sleeper").unwrap().failure,
        Some(FailureReason::Interrupted)
    );
    assert_eq!(summary.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn second_interrupt_force_kills_a_stubborn_task() -> TestResult {
    init_tracing();

    let builder =
        TaskGraphBuilder::new().with_def(shell_task("stubborn", "trap '' TERM; sleep 30"));

    let started = Instant::now();
    let summary = run_with_interrupts(builder, Duration::from_secs(30), &[300, 300]).await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        summary.task("stubborn").unwrap().failure,
        Some(FailureReason::ForcedTermination)
    );
    Ok(())
}

#[tokio::test]
async fn grace_period_expiry_force_kills_a_stubborn_task() -> TestResult {
    init_tracing();

    let builder =
        TaskGraphBuilder::new().with_def(shell_task("stubborn", "trap '' TERM; sleep 30"));

    let started = Instant::now();
    let summary = run_with_interrupts(builder, Duration::from_millis(300), &[300]).await?;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(550), "grace was honoured");
    assert!(elapsed < Duration::from_secs(5));
    assert!(summary.interrupted);
    assert_eq!(
        summary.task("stubborn").unwrap().failure,
        Some(FailureReason::ForcedTermination)
    );
    Ok(())
}

#[tokio::test]
async fn second_interrupt_kills_a_background_child_after_the_shell_exits() -> TestResult {
    init_tracing();

    // `sh` exits straight after the echo; the sleep inherits the ignored
    // TERM and keeps stdout open.
    let builder = TaskGraphBuilder::new()
        .with_def(shell_task("daemon", "trap '' TERM; sleep 30 & echo hi"));

    let started = Instant::now();
    let summary = run_with_interrupts(builder, Duration::from_secs(30), &[300, 100]).await?;

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "took {:?}",
        started.elapsed()
    );
    let daemon = summary.task("daemon").unwrap();
    assert_eq!(daemon.failure, Some(FailureReason::ForcedTermination));
    assert_eq!(daemon.stdout, "hi\n");
    assert_eq!(summary.failed, vec!["daemon"]);
    Ok(())
}

#[tokio::test]
async fn grace_expiry_kills_a_background_child_after_the_shell_exits() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let marker = dir.path().join("survived");

    let line = format!(
        "trap '' TERM; (sleep 2; touch '{}') & echo hi",
        marker.display()
    );
    let builder = TaskGraphBuilder::new().with_def(shell_task("daemon", &line));

    let started = Instant::now();
    let summary = run_with_interrupts(builder, Duration::from_millis(200), &[300]).await?;

    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "took {:?}",
        started.elapsed()
    );
    assert!(summary.interrupted);
    assert_eq!(
        summary.task("daemon").unwrap().failure,
        Some(FailureReason::ForcedTermination)
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists(), "background child outlived the run");
    Ok(())
}

#[tokio::test]
async fn interrupt_stops_pending_retries() -> TestResult {
    init_tracing();

    let builder = TaskGraphBuilder::new()
        .with_def(shell_task("flaky", "sleep 0.2; exit 3").retries(50));

    let settings = RunSettings::default().with_concurrency(1);
    let orchestrator = Orchestrator::new(builder.build(), settings)?;
    let handle = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.request();
    });

    let summary = with_timeout(orchestrator.run(|_: &TaskEvent| {})).await?;

    let flaky = summary.task("flaky").unwrap();
    assert!(flaky.attempts < 50, "retries stopped after shutdown");
    assert_eq!(summary.failed, vec!["flaky"]);
    Ok(())
}
