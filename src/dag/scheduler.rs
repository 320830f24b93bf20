use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{StateMap, TaskState};
use crate::engine::{TaskName, TaskOutcome};
use crate::errors::{DagrunError, Result};

/// Scheduler holds the validated DAG plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a task is "ready" to run (all deps succeeded)
/// - admitting ready tasks up to the concurrency limit
/// - recording task outcomes
/// - skipping dependents when a task fails
/// - skipping everything not yet started once admission stops
///
/// It never touches processes or clocks; every change is driven by one of
/// the `step_*` calls.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    states: StateMap,
    concurrency: usize,
    /// Cleared on shutdown; no new task is admitted afterwards.
    admitting: bool,
}

impl Scheduler {
    /// Validate `graph` and put every task in `Pending`.
    pub fn new(graph: TaskGraph, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(DagrunError::ConfigError(
                "concurrency must be >= 1 (got 0)".to_string(),
            ));
        }
        graph.validate()?;

        let states = graph
            .task_names()
            .map(|name| (name.to_string(), TaskState::Pending))
            .collect();

        Ok(Self {
            graph,
            states,
            concurrency,
            admitting: true,
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_admitting(&self) -> bool {
        self.admitting
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.states.get(task).copied()
    }

    pub fn states(&self) -> &StateMap {
        &self.states
    }

    pub fn running_count(&self) -> usize {
        ReadOnlyStateManager::new(&self.states).running_count()
    }

    /// `true` once every task is `Succeeded`, `Failed` or `Skipped`.
    pub fn is_finished(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    /// Names of tasks in declaration order, for dry-run output.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.task_names()
    }

    /// Whether the dependencies of `task` have all succeeded.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let def = self.graph.task(task)?;
        Some(ReadOnlyStateManager::new(&self.states).deps_satisfied(def))
    }

    /// Initial admission: promote tasks without dependencies and start as
    /// many as the limit allows.
    pub fn step_admit(&mut self) -> Result<SchedulerStep> {
        let newly_scheduled = if self.admitting {
            let mut manager = StateManager::new(&self.graph, &mut self.states);
            manager.promote_ready()?;
            manager.admit(self.concurrency)?
        } else {
            Vec::new()
        };

        Ok(SchedulerStep {
            newly_scheduled,
            newly_skipped: Vec::new(),
            run_finished: self.is_finished(),
        })
    }

    /// Record the outcome of a running task and work out what follows.
    ///
    /// - Success promotes dependents whose dependencies have now all
    ///   succeeded.
    /// - Failure skips every transitive dependent that has not started.
    /// - Freed slots are refilled unless admission has stopped.
    pub fn step_completion(&mut self, task: &str, outcome: TaskOutcome) -> Result<SchedulerStep> {
        let admitting = self.admitting;
        let concurrency = self.concurrency;
        let mut manager = StateManager::new(&self.graph, &mut self.states);
        let mut newly_skipped = Vec::new();

        match outcome {
            TaskOutcome::Succeeded => {
                manager.transition(task, TaskState::Succeeded)?;
                debug!(task, "task completed successfully");
                manager.promote_ready()?;
            }
            TaskOutcome::Failed(reason) => {
                manager.transition(task, TaskState::Failed)?;
                warn!(task, %reason, "task failed; skipping dependents");
                newly_skipped = manager.skip_dependents_of(task)?;
            }
        }

        let newly_scheduled = if admitting {
            manager.admit(concurrency)?
        } else {
            Vec::new()
        };

        let run_finished = self.is_finished();
        if run_finished {
            info!("scheduler: all tasks terminal; run finished");
        }

        Ok(SchedulerStep {
            newly_scheduled,
            newly_skipped,
            run_finished,
        })
    }

    /// Stop admitting tasks and skip everything that has not started.
    ///
    /// Running tasks are left alone; their completions are still accepted.
    pub fn stop_admission(&mut self) -> Result<SchedulerStep> {
        let newly_skipped = if self.admitting {
            self.admitting = false;
            info!("scheduler: admission stopped");
            StateManager::new(&self.graph, &mut self.states).skip_waiting()?
        } else {
            Vec::new()
        };

        Ok(SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped,
            run_finished: self.is_finished(),
        })
    }

    /// Names of tasks currently `Running`, in declaration order.
    pub fn running_tasks(&self) -> Vec<TaskName> {
        self.graph
            .task_names()
            .filter(|name| self.states.get(*name) == Some(&TaskState::Running))
            .map(str::to_string)
            .collect()
    }
}
