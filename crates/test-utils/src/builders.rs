#![allow(dead_code)]

use dagrun::dag::{TaskDef, TaskGraph};
use dagrun::errors::Result;
use dagrun::exec::CommandSpec;

/// A task running `echo <name>`.
pub fn task(name: &str) -> TaskDef {
    TaskDef::new(name, CommandSpec::shell(format!("echo {name}")))
}

/// A task running `line` through the shell.
pub fn shell_task(name: &str, line: &str) -> TaskDef {
    TaskDef::new(name, CommandSpec::shell(line))
}

/// Builder for `TaskGraph` to simplify test setup.
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<TaskDef>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `echo` task with the given dependencies.
    pub fn with_task(self, name: &str, after: &[&str]) -> Self {
        self.with_def(task(name).depends_on(after.iter().copied()))
    }

    pub fn with_def(mut self, def: TaskDef) -> Self {
        self.tasks.push(def);
        self
    }

    /// Add every task and validate the graph.
    pub fn try_build(self) -> Result<TaskGraph> {
        let graph = self.build_unchecked()?;
        graph.validate()?;
        Ok(graph)
    }

    /// Add every task without validating dependencies.
    pub fn build_unchecked(self) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        for def in self.tasks {
            graph.add_task(def)?;
        }
        Ok(graph)
    }

    pub fn build(self) -> TaskGraph {
        self.try_build()
            .expect("Failed to build valid graph from builder")
    }
}
