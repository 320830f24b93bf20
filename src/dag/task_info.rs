// src/dag/task_info.rs

//! Task definitions and per-run task state.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::engine::TaskName;
use crate::exec::CommandSpec;

/// A node of the task graph: what to run and what it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDef {
    pub name: TaskName,
    pub command: CommandSpec,
    /// Direct dependencies, duplicates removed, declaration order kept.
    pub depends_on: Vec<TaskName>,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Per-attempt limit.
    pub timeout: Option<Duration>,
}

impl TaskDef {
    pub fn new(name: impl Into<TaskName>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            depends_on: Vec::new(),
            retries: 0,
            timeout: None,
        }
    }

    /// Add dependencies. A name listed twice is kept once.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lifecycle state of a task within a run.
///
/// ```text
/// Pending -> Ready -> Running -> Succeeded | Failed
/// Pending | Ready -> Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies succeeded; waiting for a concurrency slot.
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Never started: an upstream task failed, or the run was shut down.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a task was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// This ancestor failed or was itself skipped.
    Upstream(TaskName),
    /// The run was interrupted before the task could start.
    Shutdown,
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipCause::Upstream(task) => write!(f, "upstream task '{task}' did not succeed"),
            SkipCause::Shutdown => f.write_str("run was interrupted"),
        }
    }
}

/// Per-run state of every task, keyed by name.
pub type StateMap = HashMap<TaskName, TaskState>;

/// Description of a task that the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: TaskName,
    pub command: CommandSpec,
    pub retries: u32,
    pub timeout: Option<Duration>,
}

impl ScheduledTask {
    pub fn from_def(def: &TaskDef) -> Self {
        Self {
            name: def.name.clone(),
            command: def.command.clone(),
            retries: def.retries,
            timeout: def.timeout,
        }
    }
}
