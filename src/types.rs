use std::time::Duration;

use crate::exec::{Backoff, DEFAULT_OUTPUT_LIMIT};

/// Run-wide knobs, from `[config]` and CLI overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Maximum number of tasks running at once. Always >= 1.
    pub concurrency: usize,
    /// How long running tasks get to exit after the first interruption.
    pub grace_period: Duration,
    pub backoff: Backoff,
    /// Per-stream cap on captured output, in bytes.
    pub output_limit: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            grace_period: Duration::from_millis(5000),
            backoff: Backoff::default(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl RunSettings {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_output_limit(mut self, output_limit: usize) -> Self {
        self.output_limit = output_limit;
        self
    }
}

/// Number of CPUs, or 4 if that cannot be determined.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
