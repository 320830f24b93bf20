// src/engine/events.rs

//! Task lifecycle events reported to the caller while a run progresses.

use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::SkipCause;
use crate::engine::TaskName;
use crate::exec::{CommandOutput, TaskReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    Retrying,
    Succeeded,
    Failed,
    Skipped,
}

/// One lifecycle event.
///
/// `attempt` is 1 for `Started`, the failed attempt for `Retrying`, the total
/// number of attempts for `Succeeded`/`Failed` and 0 for `Skipped`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task: TaskName,
    pub kind: EventKind,
    pub attempt: u32,
    pub timestamp: SystemTime,
    pub detail: Option<String>,
}

impl TaskEvent {
    pub fn new(task: impl Into<TaskName>, kind: EventKind, attempt: u32) -> Self {
        Self {
            task: task.into(),
            kind,
            attempt,
            timestamp: SystemTime::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn started(task: &str) -> Self {
        Self::new(task, EventKind::Started, 1)
    }

    pub fn retrying(task: &str, attempt: u32, delay: Duration, error: &str) -> Self {
        Self::new(task, EventKind::Retrying, attempt).with_detail(Some(format!(
            "attempt {attempt} failed ({error}); retrying in {}ms",
            delay.as_millis()
        )))
    }

    /// `Succeeded` or `Failed`, with captured output in the detail.
    pub fn completed(task: &str, report: &TaskReport) -> Self {
        match &report.result {
            Ok(output) => Self::new(task, EventKind::Succeeded, report.attempts)
                .with_detail(describe_output(output)),
            Err(failure) => {
                let mut detail = failure.to_string();
                if let Some(output) = failure.output().and_then(describe_output) {
                    detail.push('\n');
                    detail.push_str(&output);
                }
                Self::new(task, EventKind::Failed, report.attempts).with_detail(Some(detail))
            }
        }
    }

    pub fn skipped(task: &str, cause: &SkipCause) -> Self {
        Self::new(task, EventKind::Skipped, 0).with_detail(Some(cause.to_string()))
    }
}

fn describe_output(output: &CommandOutput) -> Option<String> {
    let mut parts = Vec::new();
    if !output.stdout.is_empty() {
        parts.push(format!("stdout:\n{}", output.stdout.trim_end()));
    }
    if !output.stderr.is_empty() {
        parts.push(format!("stderr:\n{}", output.stderr.trim_end()));
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Receives lifecycle events, in order, from the runtime loop.
pub trait EventListener: Send {
    fn on_event(&mut self, event: &TaskEvent);
}

impl<F> EventListener for F
where
    F: FnMut(&TaskEvent) + Send,
{
    fn on_event(&mut self, event: &TaskEvent) {
        self(event)
    }
}

/// Forwards a copy of each event; a closed receiver is ignored.
impl EventListener for mpsc::UnboundedSender<TaskEvent> {
    fn on_event(&mut self, event: &TaskEvent) {
        let _ = self.send(event.clone());
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&mut self, event: &TaskEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.kind {
            EventKind::Failed | EventKind::Retrying => warn!(
                task = %event.task,
                kind = ?event.kind,
                attempt = event.attempt,
                detail,
                "task event"
            ),
            _ => info!(
                task = %event.task,
                kind = ?event.kind,
                attempt = event.attempt,
                detail,
                "task event"
            ),
        }
    }
}
