// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the commands defined in
//! the tasks, using `tokio::process::Command`, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`command`] runs one process with bounded output capture and
//!   two-stage cancellation.
//! - [`output`] holds the bounded capture buffers.
//! - [`retry`] is the retry/timeout policy shared with the worker queue.
//! - [`cancel`] is the cancellation signal threaded through every execution.
//! - [`task_runner`] runs a scheduled task through the policy and reports
//!   retry notices and the final report.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod cancel;
pub mod command;
pub mod output;
pub mod retry;
pub mod task_runner;

pub use backend::{ExecSettings, ExecutorBackend, RealExecutorBackend};
pub use cancel::CancelSignal;
pub use command::{run_command, CommandOutput, CommandSpec, CommandStatus, ExecFailure};
pub use output::{BoundedBuffer, DEFAULT_OUTPUT_LIMIT};
pub use retry::{Backoff, RetryNotice, RetryOutcome, RetryPolicy, Retryable};
pub use task_runner::{run_task, TaskReport};
