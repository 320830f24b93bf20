// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::dag::task_info::{StateMap, TaskDef, TaskState};
use crate::engine::TaskName;
use crate::errors::{DagrunError, Result};

/// Task graph keyed by name, remembering declaration order.
///
/// Tasks are stored in the order they were added; every query that returns
/// several tasks returns them in that order. Dependents are derived from the
/// dependency lists on demand rather than cached.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<TaskDef>,
    index: HashMap<TaskName, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Dependencies are not checked until [`validate`](Self::validate).
    pub fn add_task(&mut self, task: TaskDef) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(DagrunError::DuplicateTask(task.name));
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskDef> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// All tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDef> {
        self.tasks.iter()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.task(name)
            .map(|t| t.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that list `name` as a direct dependency.
    pub fn direct_dependents_of(&self, name: &str) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.depends_on.iter().any(|d| d == name))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Every task that transitively depends on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<TaskName> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![name];

        while let Some(current) = stack.pop() {
            for dependent in self.direct_dependents_of(current) {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }

        self.tasks
            .iter()
            .filter(|t| seen.contains(t.name.as_str()))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Check that every dependency names a declared task and that the graph
    /// has no cycles (a task depending on itself is a cycle).
    ///
    /// Unknown dependencies are reported before cycles.
    pub fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !self.contains(dep) {
                    return Err(DagrunError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let graph = self.as_petgraph();
        if toposort(&graph, None).is_ok() {
            return Ok(());
        }

        // Name the cycle that involves the earliest declared task.
        let members = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|mut scc| {
                scc.sort_unstable();
                scc
            })
            .min_by_key(|scc| scc[0])
            .unwrap_or_default();

        Err(DagrunError::CycleDetected {
            members: members
                .into_iter()
                .map(|i| self.tasks[i].name.clone())
                .collect(),
        })
    }

    /// Dependencies-first order; ties are broken by declaration order.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        self.validate()?;

        let mut remaining: Vec<usize> = self
            .tasks
            .iter()
            .map(|t| t.depends_on.iter().collect::<HashSet<_>>().len())
            .collect();
        let mut available: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(i) = available.pop_first() {
            let name = self.tasks[i].name.as_str();
            order.push(name);
            for dependent in self.direct_dependents_of(name) {
                let j = self.index[dependent];
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    available.insert(j);
                }
            }
        }

        Ok(order)
    }

    /// `Pending` tasks whose dependencies have all `Succeeded`, in
    /// declaration order.
    pub fn ready_tasks(&self, states: &StateMap) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| states.get(&t.name) == Some(&TaskState::Pending))
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|d| states.get(d) == Some(&TaskState::Succeeded))
            })
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Edge direction: dependency -> dependent, nodes are declaration indices.
    fn as_petgraph(&self) -> DiGraphMap<usize, ()> {
        let mut graph = DiGraphMap::new();

        for i in 0..self.tasks.len() {
            graph.add_node(i);
        }

        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                if let Some(&d) = self.index.get(dep) {
                    graph.add_edge(d, i, ());
                }
            }
        }

        graph
    }
}
