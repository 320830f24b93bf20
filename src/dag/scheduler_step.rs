// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::{ScheduledTask, SkipCause};
use crate::engine::TaskName;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the DAG and make
/// assertions about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks admitted to `Running` in this step, in declaration order.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks moved to `Skipped` in this step, in declaration order.
    pub newly_skipped: Vec<(TaskName, SkipCause)>,
    /// Whether every task is now terminal.
    pub run_finished: bool,
}
