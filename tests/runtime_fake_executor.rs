// tests/runtime_fake_executor.rs

//! Full runtime loop against the scripted executor (no processes).

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dagrun::dag::{SkipCause, TaskState};
use dagrun::engine::{EventKind, FailureReason, Orchestrator, TaskEvent};
use dagrun::types::RunSettings;
use dagrun_test_utils::builders::{task, TaskGraphBuilder};
use dagrun_test_utils::fake_executor::{ScriptedAttempt, ScriptedExecutor};
use dagrun_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Collects events into a shared vector.
fn recorder() -> (Arc<Mutex<Vec<TaskEvent>>>, impl FnMut(&TaskEvent) + Send + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |e: &TaskEvent| sink.lock().unwrap().push(e.clone()))
}

fn kinds_for(events: &[TaskEvent], task: &str) -> Vec<EventKind> {
    events
        .iter()
        .filter(|e| e.task == task)
        .map(|e| e.kind)
        .collect()
}

fn settings(concurrency: usize) -> RunSettings {
    RunSettings::default().with_concurrency(concurrency)
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_task("A", &[])
        .with_task("B", &["A"])
        .with_task("C", &["B"])
        .build();
    let orchestrator = Orchestrator::new(graph, settings(4))?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator);
    let log = executor.log();
    let (events, listener) = recorder();

    let summary = with_timeout(orchestrator.run_with_backend(executor, listener)).await?;

    assert_eq!(log.dispatched(), vec!["A", "B", "C"]);
    assert_eq!(log.peak_running(), 1);
    assert_eq!(summary.succeeded, vec!["A", "B", "C"]);
    assert!(summary.success());
    assert_eq!(summary.exit_code(), 0);
    assert!(!summary.interrupted);

    let events = events.lock().unwrap();
    let order: Vec<(String, EventKind)> =
        events.iter().map(|e| (e.task.clone(), e.kind)).collect();
    assert_eq!(
        order,
        vec![
            ("A".to_string(), EventKind::Started),
            ("A".to_string(), EventKind::Succeeded),
            ("B".to_string(), EventKind::Started),
            ("B".to_string(), EventKind::Succeeded),
            ("C".to_string(), EventKind::Started),
            ("C".to_string(), EventKind::Succeeded),
        ]
    );
    assert_eq!(
        events[1].detail.as_deref(),
        Some("stdout:\nran A"),
        "completion detail carries captured output"
    );
    Ok(())
}

#[tokio::test]
async fn never_exceeds_concurrency_limit() -> TestResult {
    init_tracing();

    let mut builder = TaskGraphBuilder::new();
    for i in 0..10 {
        builder = builder.with_task(&format!("t{i}"), &[]);
    }
    let orchestrator = Orchestrator::new(builder.build(), settings(3))?;
    let executor =
        ScriptedExecutor::for_orchestrator(&orchestrator).default_delay(Duration::from_millis(20));
    let log = executor.log();

    let summary = with_timeout(orchestrator.run_with_backend(executor, |_: &TaskEvent| {})).await?;

    assert_eq!(summary.succeeded.len(), 10);
    assert_eq!(log.peak_running(), 3);
    // FIFO by declaration order.
    assert_eq!(&log.dispatched()[..3], ["t0", "t1", "t2"]);
    Ok(())
}

#[tokio::test]
async fn failed_lint_skips_deploy_without_running_it() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_task("install", &[])
        .with_def(task("lint").depends_on(["install"]).retries(1))
        .with_task("deploy", &["lint"])
        .build();
    let orchestrator = Orchestrator::new(graph, settings(2))?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator)
        .script("lint", [ScriptedAttempt::Fail(1), ScriptedAttempt::Fail(1)]);
    let log = executor.log();
    let (events, listener) = recorder();

    let summary = with_timeout(orchestrator.run_with_backend(executor, listener)).await?;

    assert_eq!(log.dispatched(), vec!["install", "lint"]);
    assert_eq!(summary.succeeded, vec!["install"]);
    assert_eq!(summary.failed, vec!["lint"]);
    assert_eq!(summary.skipped, vec!["deploy"]);
    assert_eq!(summary.exit_code(), 1);

    let lint = summary.task("lint").unwrap();
    assert_eq!(lint.attempts, 2);
    assert_eq!(lint.failure, Some(FailureReason::NonZeroExit(1)));

    let deploy = summary.task("deploy").unwrap();
    assert_eq!(deploy.state, TaskState::Skipped);
    assert_eq!(deploy.attempts, 0);
    assert_eq!(deploy.skip_cause, Some(SkipCause::Upstream("lint".into())));

    let events = events.lock().unwrap();
    assert_eq!(
        kinds_for(&events, "lint"),
        vec![EventKind::Started, EventKind::Retrying, EventKind::Failed]
    );
    assert_eq!(kinds_for(&events, "deploy"), vec![EventKind::Skipped]);

    let skip = events.iter().find(|e| e.kind == EventKind::Skipped).unwrap();
    assert!(skip.detail.as_deref().unwrap_or("").contains("lint"));
    Ok(())
}

#[tokio::test]
async fn retries_recover_from_transient_failures() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_task("install", &[])
        .with_task("build", &["install"])
        .with_def(task("test").depends_on(["build"]).retries(2))
        .build();
    let orchestrator = Orchestrator::new(graph, settings(2))?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator).script(
        "test",
        [ScriptedAttempt::Fail(1), ScriptedAttempt::TimeOut, ScriptedAttempt::Succeed],
    );
    let (events, listener) = recorder();

    let summary = with_timeout(orchestrator.run_with_backend(executor, listener)).await?;

    assert!(summary.success());
    assert_eq!(summary.task("test").unwrap().attempts, 3);

    let events = events.lock().unwrap();
    let retries: Vec<u32> = events
        .iter()
        .filter(|e| e.task == "test" && e.kind == EventKind::Retrying)
        .map(|e| e.attempt)
        .collect();
    assert_eq!(retries, vec![1, 2]);

    let done = events
        .iter()
        .find(|e| e.task == "test" && e.kind == EventKind::Succeeded)
        .unwrap();
    assert_eq!(done.attempt, 3);
    Ok(())
}

#[tokio::test]
async fn retry_budget_is_never_exceeded() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_def(task("flaky").retries(3))
        .build();
    let orchestrator = Orchestrator::new(graph, settings(1))?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator)
        .script("flaky", std::iter::repeat(ScriptedAttempt::Fail(7)).take(10));

    let summary = with_timeout(orchestrator.run_with_backend(executor, |_: &TaskEvent| {})).await?;

    let flaky = summary.task("flaky").unwrap();
    assert_eq!(flaky.attempts, 4);
    assert_eq!(flaky.failure, Some(FailureReason::NonZeroExit(7)));
    Ok(())
}

#[tokio::test]
async fn first_shutdown_lets_running_task_finish_and_skips_the_rest() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_task("slow", &[])
        .with_task("after_slow", &["slow"])
        .with_task("queued", &[])
        .build();
    let orchestrator = Orchestrator::new(
        graph,
        settings(1).with_grace_period(Duration::from_secs(5)),
    )?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator)
        .delay("slow", Duration::from_millis(200));
    let log = executor.log();
    let handle = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.request();
    });

    let summary = with_timeout(orchestrator.run_with_backend(executor, |_: &TaskEvent| {})).await?;

    assert!(summary.interrupted);
    assert_eq!(summary.succeeded, vec!["slow"]);
    assert_eq!(summary.skipped, vec!["after_slow", "queued"]);
    assert_eq!(
        summary.task("queued").unwrap().skip_cause,
        Some(SkipCause::Shutdown)
    );
    assert_eq!(log.dispatched(), vec!["slow"]);
    // Skips caused by shutdown are not failures.
    assert_eq!(summary.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn second_shutdown_forces_termination() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new().with_task("stuck", &[]).build();
    let orchestrator = Orchestrator::new(
        graph,
        settings(1).with_grace_period(Duration::from_secs(30)),
    )?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator)
        .delay("stuck", Duration::from_secs(60));
    let handle = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.request();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.request();
    });

    let summary = with_timeout(orchestrator.run_with_backend(executor, |_: &TaskEvent| {})).await?;

    assert!(summary.interrupted);
    assert_eq!(summary.failed, vec!["stuck"]);
    assert_eq!(
        summary.task("stuck").unwrap().failure,
        Some(FailureReason::ForcedTermination)
    );
    Ok(())
}

#[tokio::test]
async fn grace_period_expiry_forces_termination() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new().with_task("stuck", &[]).build();
    let orchestrator = Orchestrator::new(
        graph,
        settings(1).with_grace_period(Duration::from_millis(100)),
    )?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator)
        .delay("stuck", Duration::from_secs(60));
    let handle = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.request();
    });

    let summary = with_timeout(orchestrator.run_with_backend(executor, |_: &TaskEvent| {})).await?;

    assert_eq!(
        summary.task("stuck").unwrap().failure,
        Some(FailureReason::ForcedTermination)
    );
    Ok(())
}

#[tokio::test]
async fn events_can_be_streamed_over_a_channel() -> TestResult {
    init_tracing();

    let graph = TaskGraphBuilder::new()
        .with_task("one", &[])
        .with_task("two", &["one"])
        .build();
    let orchestrator = Orchestrator::new(graph, settings(1))?;
    let executor = ScriptedExecutor::for_orchestrator(&orchestrator);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    with_timeout(orchestrator.run_with_backend(executor, tx)).await?;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push((event.task, event.kind));
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3], ("two".to_string(), EventKind::Succeeded));
    Ok(())
}
