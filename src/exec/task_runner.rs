// src/exec/task_runner.rs

//! Individual task runner: retry policy around the command runner.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::exec::cancel::CancelSignal;
use crate::exec::command::{run_command, CommandOutput, ExecFailure};
use crate::exec::retry::{RetryNotice, RetryPolicy};

/// Everything the runtime needs to know about a finished task execution.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Last attempt's result; the error is always the final one.
    pub result: Result<CommandOutput, ExecFailure>,
    /// Wall time across all attempts and backoff waits.
    pub duration: Duration,
}

/// Run a scheduled task to completion and report back to the runtime.
///
/// - Each failed attempt that will be retried produces a `TaskRetrying`
///   event before the backoff wait.
/// - Exactly one `TaskCompleted` event is sent at the end, whatever
///   happened (including cancellation).
pub async fn run_task(
    task: ScheduledTask,
    policy: RetryPolicy,
    output_limit: usize,
    cancel: CancelSignal,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
) {
    info!(
        task = %task.name,
        cmd = %task.command,
        max_attempts = policy.max_attempts(),
        "starting task"
    );

    let started = Instant::now();
    let name = task.name.as_str();
    let command = &task.command;
    let cancel_ref = &cancel;

    let outcome = policy
        .run(
            &cancel,
            |notice: RetryNotice<'_, ExecFailure>| {
                warn!(
                    task = %name,
                    attempt = notice.attempt,
                    delay_ms = notice.delay.as_millis() as u64,
                    error = %notice.error,
                    "attempt failed; retrying"
                );
                let _ = runtime_tx.send(RuntimeEvent::TaskRetrying {
                    task: name.to_string(),
                    attempt: notice.attempt,
                    delay: notice.delay,
                    error: notice.error.to_string(),
                });
            },
            |attempt| async move {
                debug!(task = %name, attempt, "starting attempt");
                run_command(command, output_limit, cancel_ref)
                    .await?
                    .into_result()
            },
        )
        .await;

    let report = TaskReport {
        attempts: outcome.attempts,
        result: outcome.result,
        duration: started.elapsed(),
    };

    match &report.result {
        Ok(_) => info!(
            task = %task.name,
            attempts = report.attempts,
            duration_ms = report.duration.as_millis() as u64,
            "task succeeded"
        ),
        Err(e) => warn!(
            task = %task.name,
            attempts = report.attempts,
            error = %e,
            "task failed"
        ),
    }

    if runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            task: task.name.clone(),
            report,
        })
        .is_err()
    {
        debug!(task = %task.name, "runtime gone; dropping completion");
    }
}
