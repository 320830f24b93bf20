// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod queue;
pub mod types;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::dag::TaskGraph;
use crate::engine::{spawn_signal_listener, EventKind, Orchestrator, RunSummary, TaskEvent};
use crate::types::RunSettings;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the orchestrator and its real executor
/// - Ctrl-C / SIGTERM handling
/// - event and summary output on stdout
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading task file '{}'", args.config))?;
    let (mut settings, graph) = cfg.into_parts();

    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }
    if let Some(ms) = args.grace_period_ms {
        settings.grace_period = Duration::from_millis(ms);
    }

    if args.dry_run {
        print_dry_run(&graph, &settings)?;
        return Ok(0);
    }

    let orchestrator = Orchestrator::new(graph, settings)?;
    let signals = spawn_signal_listener(orchestrator.shutdown_handle());

    let show_output = args.show_output;
    let summary = orchestrator
        .run(move |event: &TaskEvent| print_event(event, show_output))
        .await?;
    signals.abort();

    print_summary(&summary);
    Ok(summary.exit_code())
}

fn print_event(event: &TaskEvent, show_output: bool) {
    let label = match event.kind {
        EventKind::Started => "start",
        EventKind::Retrying => "retry",
        EventKind::Succeeded => "ok",
        EventKind::Failed => "FAIL",
        EventKind::Skipped => "skip",
    };

    let detail = match (event.kind, event.detail.as_deref()) {
        (EventKind::Succeeded, Some(detail)) if show_output => Some(detail),
        (EventKind::Failed, Some(detail)) if show_output => Some(detail),
        (EventKind::Failed, Some(detail)) => detail.lines().next(),
        (EventKind::Retrying | EventKind::Skipped, Some(detail)) => Some(detail),
        _ => None,
    };

    match detail {
        Some(detail) if detail.contains('\n') => {
            println!("[{label:>5}] {}", event.task);
            for line in detail.lines() {
                println!("        {line}");
            }
        }
        Some(detail) => println!("[{label:>5}] {}: {detail}", event.task),
        None => println!("[{label:>5}] {}", event.task),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{summary}");
    for task in summary.tasks.iter().filter(|t| t.failure.is_some()) {
        if let Some(reason) = &task.failure {
            println!("  failed: {} ({reason}, {} attempt(s))", task.name, task.attempts);
        }
    }
    if !summary.skipped.is_empty() {
        println!("  skipped: {}", summary.skipped.join(", "));
    }
}

/// Simple dry-run output: settings, then tasks in run order.
fn print_dry_run(graph: &TaskGraph, settings: &RunSettings) -> Result<()> {
    println!("dagrun dry-run");
    println!("  concurrency = {}", settings.concurrency);
    println!("  grace_period = {}ms", settings.grace_period.as_millis());
    println!(
        "  backoff = {}ms..{}ms",
        settings.backoff.base.as_millis(),
        settings.backoff.max.as_millis()
    );
    println!();

    println!("tasks ({}):", graph.len());
    for name in graph.topological_order()? {
        let Some(task) = graph.task(name) else {
            continue;
        };
        println!("  - {name}");
        println!("      cmd: {}", task.command);
        if !task.depends_on.is_empty() {
            println!("      after: {:?}", task.depends_on);
        }
        if task.retries > 0 {
            println!("      retries: {}", task.retries);
        }
        if let Some(timeout) = task.timeout {
            println!("      timeout: {}ms", timeout.as_millis());
        }
        if let Some(cwd) = &task.command.cwd {
            println!("      cwd: {}", cwd.display());
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
