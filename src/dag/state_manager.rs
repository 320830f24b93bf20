// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::task_info::{ScheduledTask, SkipCause, StateMap, TaskDef, TaskState};
use crate::engine::TaskName;
use crate::errors::{DagrunError, Result};

/// Manages per-run state transitions for tasks.
///
/// Every state change goes through [`transition`](Self::transition), which
/// rejects moves the task lifecycle does not allow.
pub struct StateManager<'a> {
    graph: &'a TaskGraph,
    states: &'a mut StateMap,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, states: &'a mut StateMap) -> Self {
        Self { graph, states }
    }

    pub fn transition(&mut self, task: &str, to: TaskState) -> Result<()> {
        let state = self
            .states
            .get_mut(task)
            .ok_or_else(|| DagrunError::TaskNotFound(task.to_string()))?;

        if !state.can_transition_to(to) {
            return Err(DagrunError::InvalidTransition {
                task: task.to_string(),
                from: *state,
                to,
            });
        }

        debug!(task, from = %state, %to, "state transition");
        *state = to;
        Ok(())
    }

    /// Move every `Pending` task whose dependencies all succeeded to `Ready`.
    pub fn promote_ready(&mut self) -> Result<Vec<TaskName>> {
        let ready: Vec<TaskName> = self
            .graph
            .ready_tasks(self.states)
            .into_iter()
            .map(str::to_string)
            .collect();

        for name in &ready {
            self.transition(name, TaskState::Ready)?;
        }

        Ok(ready)
    }

    /// Move `Ready` tasks to `Running`, in declaration order, until `limit`
    /// tasks are running.
    pub fn admit(&mut self, limit: usize) -> Result<Vec<ScheduledTask>> {
        let graph = self.graph;
        let mut running = self.running_count();
        let mut admitted = Vec::new();

        for def in graph.tasks() {
            if running >= limit {
                break;
            }
            if self.states.get(&def.name) != Some(&TaskState::Ready) {
                continue;
            }

            self.transition(&def.name, TaskState::Running)?;
            info!(task = %def.name, "scheduling task");
            admitted.push(ScheduledTask::from_def(def));
            running += 1;
        }

        Ok(admitted)
    }

    /// Skip every transitive dependent of a task that did not succeed.
    pub fn skip_dependents_of(&mut self, failed: &str) -> Result<Vec<(TaskName, SkipCause)>> {
        let mut skipped = Vec::new();

        for name in self.graph.dependents_of(failed) {
            match self.states.get(&name) {
                Some(TaskState::Pending) | Some(TaskState::Ready) => {
                    self.transition(&name, TaskState::Skipped)?;
                    debug!(task = %name, upstream = failed, "skipping dependent of failed task");
                    skipped.push((name, SkipCause::Upstream(failed.to_string())));
                }
                Some(TaskState::Running) => {
                    // Cannot happen: a running task had all dependencies succeed.
                    warn!(task = %name, upstream = failed, "dependent already running");
                }
                _ => {}
            }
        }

        Ok(skipped)
    }

    /// Skip every task that has not started yet.
    pub fn skip_waiting(&mut self) -> Result<Vec<(TaskName, SkipCause)>> {
        let waiting: Vec<TaskName> = self
            .graph
            .tasks()
            .filter(|t| {
                matches!(
                    self.states.get(&t.name),
                    Some(TaskState::Pending) | Some(TaskState::Ready)
                )
            })
            .map(|t| t.name.clone())
            .collect();

        let mut skipped = Vec::with_capacity(waiting.len());
        for name in waiting {
            self.transition(&name, TaskState::Skipped)?;
            skipped.push((name, SkipCause::Shutdown));
        }

        Ok(skipped)
    }

    pub fn running_count(&self) -> usize {
        running_count(self.states)
    }
}

/// A read-only view of the run state for checking dependency satisfaction.
///
/// This is used when we only have shared access to the state map (e.g. in
/// `Scheduler::deps_satisfied`).
pub struct ReadOnlyStateManager<'a> {
    states: &'a StateMap,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(states: &'a StateMap) -> Self {
        Self { states }
    }

    /// Whether every dependency of `def` has succeeded in this run.
    pub fn deps_satisfied(&self, def: &TaskDef) -> bool {
        def.depends_on
            .iter()
            .all(|d| self.states.get(d) == Some(&TaskState::Succeeded))
    }

    pub fn running_count(&self) -> usize {
        running_count(self.states)
    }
}

fn running_count(states: &StateMap) -> usize {
    states
        .values()
        .filter(|s| **s == TaskState::Running)
        .count()
}
