// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::dag::{TaskDef, TaskGraph};
use crate::exec::{Backoff, CommandSpec, DEFAULT_OUTPUT_LIMIT};
use crate::types::{default_concurrency, RunSettings};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// concurrency = 2
///
/// [task.install]
/// cmd = "npm"
/// args = ["ci"]
///
/// [task.build]
/// cmd = "npm run build"
/// after = ["install"]
/// retries = 1
/// ```
///
/// All sections are optional and have reasonable defaults. Tasks keep the
/// order they appear in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Run-wide settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, in file order.
    #[serde(default)]
    pub task: IndexMap<String, TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum parallel tasks. Defaults to the number of CPUs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_output_limit_bytes() -> usize {
    DEFAULT_OUTPUT_LIMIT
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            grace_period_ms: default_grace_period_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }
}

impl ConfigSection {
    pub fn to_settings(&self) -> RunSettings {
        RunSettings {
            concurrency: self.concurrency,
            grace_period: Duration::from_millis(self.grace_period_ms),
            backoff: Backoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            output_limit: self.output_limit_bytes,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Program to run when `args` is given, otherwise a shell command line.
    pub cmd: String,

    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Names of tasks that must succeed before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Text written to the command's stdin.
    #[serde(default)]
    pub stdin: Option<String>,
}

impl TaskConfig {
    /// Build the task definition. A relative `cwd` is resolved against
    /// `base_dir`.
    pub fn to_task_def(&self, name: &str, base_dir: &Path) -> TaskDef {
        let mut command = match &self.args {
            Some(args) => CommandSpec::new(&self.cmd).args(args.iter().cloned()),
            None => CommandSpec::shell(&self.cmd),
        };

        if let Some(cwd) = &self.cwd {
            command = command.cwd(if cwd.is_relative() {
                base_dir.join(cwd)
            } else {
                cwd.clone()
            });
        }
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        if let Some(input) = &self.stdin {
            command = command.stdin(input.as_bytes());
        }

        let mut def = TaskDef::new(name, command)
            .depends_on(self.after.iter().cloned())
            .retries(self.retries);
        if let Some(ms) = self.timeout_ms {
            def = def.timeout(Duration::from_millis(ms));
        }
        def
    }
}

/// A validated configuration: run settings plus a validated task graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    settings: RunSettings,
    graph: TaskGraph,
}

impl ConfigFile {
    /// Used by validation; does not check anything.
    pub(crate) fn new_unchecked(settings: RunSettings, graph: TaskGraph) -> Self {
        Self { settings, graph }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn into_parts(self) -> (RunSettings, TaskGraph) {
        (self.settings, self.graph)
    }
}
