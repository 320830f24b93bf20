// src/engine/summary.rs

//! Per-task results and the end-of-run summary.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::dag::{SkipCause, StateMap, TaskGraph, TaskState};
use crate::engine::{FailureReason, TaskName, TaskOutcome};
use crate::exec::TaskReport;

/// Final record of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub name: TaskName,
    pub state: TaskState,
    /// 0 for tasks that never started.
    pub attempts: u32,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<FailureReason>,
    pub skip_cause: Option<SkipCause>,
}

/// Result of a whole run. Task lists are in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks: Vec<TaskResult>,
    pub succeeded: Vec<TaskName>,
    pub failed: Vec<TaskName>,
    pub skipped: Vec<TaskName>,
    pub duration: Duration,
    /// The run was cut short by a shutdown request.
    pub interrupted: bool,
}

impl RunSummary {
    /// No task failed. Tasks skipped because of a shutdown do not count.
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    pub fn task(&self, name: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped in {:.2}s",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            self.duration.as_secs_f64()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TaskRecord {
    attempts: u32,
    duration: Duration,
    stdout: String,
    stderr: String,
    failure: Option<FailureReason>,
    skip_cause: Option<SkipCause>,
}

/// Collects per-task facts while the run progresses.
#[derive(Debug)]
pub struct RunRecorder {
    started: Instant,
    records: HashMap<TaskName, TaskRecord>,
    interrupted: bool,
}

impl Default for RunRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRecorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records: HashMap::new(),
            interrupted: false,
        }
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn record_completion(&mut self, task: &str, report: &TaskReport) {
        let record = self.records.entry(task.to_string()).or_default();
        record.attempts = report.attempts;
        record.duration = report.duration;

        let output = match &report.result {
            Ok(output) => Some(output),
            Err(failure) => failure.output(),
        };
        if let Some(output) = output {
            record.stdout = output.stdout.clone();
            record.stderr = output.stderr.clone();
        }

        if let TaskOutcome::Failed(reason) = TaskOutcome::from_report(report) {
            record.failure = Some(reason);
        }
    }

    pub fn record_skip(&mut self, task: &str, cause: &SkipCause) {
        self.records.entry(task.to_string()).or_default().skip_cause = Some(cause.clone());
    }

    pub fn finish(mut self, graph: &TaskGraph, states: &StateMap) -> RunSummary {
        let mut summary = RunSummary {
            tasks: Vec::with_capacity(graph.len()),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            duration: self.started.elapsed(),
            interrupted: self.interrupted,
        };

        for name in graph.task_names() {
            let state = states.get(name).copied().unwrap_or(TaskState::Pending);
            let record = self.records.remove(name).unwrap_or_default();

            match state {
                TaskState::Succeeded => summary.succeeded.push(name.to_string()),
                TaskState::Failed => summary.failed.push(name.to_string()),
                TaskState::Skipped => summary.skipped.push(name.to_string()),
                _ => {}
            }

            summary.tasks.push(TaskResult {
                name: name.to_string(),
                state,
                attempts: record.attempts,
                duration: record.duration,
                stdout: record.stdout,
                stderr: record.stderr,
                failure: record.failure,
                skip_cause: record.skip_cause,
            });
        }

        summary
    }
}
