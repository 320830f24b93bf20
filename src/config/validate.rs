// src/config/validate.rs

use std::path::Path;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::TaskGraph;
use crate::errors::{DagrunError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagrunError;

    /// Relative `cwd`s stay relative to the process working directory.
    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_with_base(raw, Path::new(""))
    }
}

/// Validate `raw`, resolving relative task `cwd`s against `base_dir`.
pub fn validate_with_base(raw: RawConfigFile, base_dir: &Path) -> Result<ConfigFile> {
    ensure_has_tasks(&raw)?;
    validate_global_config(&raw)?;

    let mut graph = TaskGraph::new();
    for (name, task) in raw.task.iter() {
        graph.add_task(task.to_task_def(name, base_dir))?;
    }
    graph.validate()?;

    Ok(ConfigFile::new_unchecked(raw.config.to_settings(), graph))
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(DagrunError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == 0 {
        return Err(DagrunError::ConfigError(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.backoff_max_ms < cfg.config.backoff_base_ms {
        return Err(DagrunError::ConfigError(format!(
            "[config].backoff_max_ms ({}) must be >= backoff_base_ms ({})",
            cfg.config.backoff_max_ms, cfg.config.backoff_base_ms
        )));
    }

    Ok(())
}
