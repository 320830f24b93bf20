// src/exec/command.rs

//! Running one external command.
//!
//! [`run_command`] spawns a single child process, drains stdout/stderr into
//! bounded buffers and resolves with a [`CommandOutput`] once the process has
//! exited. A non-zero exit is still an `Ok` here; only a failure to launch is
//! an `Err`. Callers that want "non-zero is failure" semantics use
//! [`CommandOutput::into_result`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::exec::cancel::CancelSignal;
use crate::exec::output::{capture, BoundedBuffer};
use crate::exec::retry::Retryable;

/// How long captures may keep draining after the group has been killed.
const KILL_DRAIN: Duration = Duration::from_millis(250);

/// What to execute: a program, its arguments and process overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added to (or overriding) the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Run `line` through the platform shell (`sh -c` / `cmd /C`).
    pub fn shell(line: impl Into<String>) -> Self {
        if cfg!(windows) {
            Self::new("cmd").arg("/C").arg(line)
        } else {
            Self::new("sh").arg("-c").arg(line)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let stdin = if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so signals reach everything the command spawns.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited on its own. `-1` when killed by a signal we did not send.
    Exited(i32),
    /// Ended because cancellation was requested. `forced` means SIGKILL.
    Cancelled { forced: bool },
}

/// Captured result of one process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            CommandStatus::Exited(code) => Some(code),
            CommandStatus::Cancelled { .. } => None,
        }
    }

    /// `Ok` only for a zero exit code.
    pub fn into_result(self) -> Result<CommandOutput, ExecFailure> {
        match self.status {
            CommandStatus::Exited(0) => Ok(self),
            CommandStatus::Exited(_) => Err(ExecFailure::NonZeroExit(self)),
            CommandStatus::Cancelled { .. } => Err(ExecFailure::Cancelled(self)),
        }
    }

    fn cancel_description(&self) -> &'static str {
        match self.status {
            CommandStatus::Cancelled { forced: true } => "forcibly terminated",
            _ => "terminated on request",
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecFailure {
    #[error("failed to launch `{program}`: {message}")]
    Launch { program: String, message: String },

    #[error("exited with status {}", .0.exit_code().unwrap_or(-1))]
    NonZeroExit(CommandOutput),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{}", .0.cancel_description())]
    Cancelled(CommandOutput),
}

impl ExecFailure {
    /// Captured output, when the process got far enough to produce any.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ExecFailure::NonZeroExit(out) | ExecFailure::Cancelled(out) => Some(out),
            ExecFailure::Launch { .. } | ExecFailure::Timeout(_) => None,
        }
    }
}

impl Retryable for ExecFailure {
    fn timed_out(after: Duration) -> Self {
        ExecFailure::Timeout(after)
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, ExecFailure::Cancelled(_))
    }
}

/// Run one command to completion.
///
/// - `output_limit` bounds each captured stream.
/// - `cancel.terminate` sends SIGTERM to the process group and keeps
///   waiting; `cancel.kill` sends SIGKILL and reaps.
///
/// Both phases observe `cancel`: while the direct child runs, and while
/// anything it left behind still holds stdout or stderr open. Dropping the
/// returned future before the output closes kills the whole process group.
pub async fn run_command(
    spec: &CommandSpec,
    output_limit: usize,
    cancel: &CancelSignal,
) -> Result<CommandOutput, ExecFailure> {
    let started = Instant::now();

    let mut child = spec.to_command().spawn().map_err(|e| ExecFailure::Launch {
        program: spec.program.clone(),
        message: e.to_string(),
    })?;

    let mut guard = ProcessGroupGuard::new(child.id());

    debug!(pid = ?child.id(), cmd = %spec, "process spawned");

    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "child closed stdin before input was written");
            }
            // Dropping `stdin` closes the pipe.
        });
    }

    let stdout_task = child
        .stdout
        .take()
        .map(|s| tokio::spawn(capture(s, output_limit)));
    let stderr_task = child
        .stderr
        .take()
        .map(|s| tokio::spawn(capture(s, output_limit)));
    guard.track(stdout_task.iter().chain(stderr_task.iter()));

    let (wait_result, cancelled) = tokio::select! {
        biased;

        _ = cancel.killed() => (force_kill(&mut child).await, Some(true)),

        _ = cancel.terminated() => {
            info!(pid = ?child.id(), cmd = %spec, "termination requested; signalling process");
            request_terminate(&mut child);

            tokio::select! {
                res = child.wait() => (res, Some(false)),
                _ = cancel.killed() => (force_kill(&mut child).await, Some(true)),
            }
        }

        res = child.wait() => (res, None),
    };

    let exit = wait_result.map_err(|e| ExecFailure::Launch {
        program: spec.program.clone(),
        message: format!("waiting for process: {e}"),
    })?;

    // The leader is gone, but anything it left in the group may still hold
    // the pipes open. The guard stays armed until both captures finish.
    let mut status = classify(exit, cancelled);
    let mut terminate_sent = cancelled.is_some();
    let captures = join_captures(stdout_task, stderr_task);
    tokio::pin!(captures);

    let (stdout, stderr) = loop {
        tokio::select! {
            biased;

            _ = cancel.killed(), if status != (CommandStatus::Cancelled { forced: true }) => {
                info!(cmd = %spec, "kill requested while output is still open; killing process group");
                status = CommandStatus::Cancelled { forced: true };
                guard.kill_group();

                break match tokio::time::timeout(KILL_DRAIN, &mut captures).await {
                    Ok(output) => output,
                    Err(_) => {
                        warn!(cmd = %spec, "output pipes still open after kill; dropping capture");
                        guard.abort_captures();
                        (String::new(), String::new())
                    }
                };
            }

            _ = cancel.terminated(), if !terminate_sent => {
                info!(cmd = %spec, "termination requested while output is still open; signalling process group");
                terminate_sent = true;
                guard.terminate_group();
            }

            output = &mut captures => break output,
        }
    };
    guard.disarm();

    let duration = started.elapsed();

    debug!(
        cmd = %spec,
        ?status,
        duration_ms = duration.as_millis() as u64,
        "process finished"
    );

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        duration,
    })
}

fn classify(exit: ExitStatus, cancelled: Option<bool>) -> CommandStatus {
    match (cancelled, exit.code()) {
        (Some(true), _) => CommandStatus::Cancelled { forced: true },
        (Some(false), None) => CommandStatus::Cancelled { forced: false },
        (_, Some(code)) => CommandStatus::Exited(code),
        (None, None) => CommandStatus::Exited(-1),
    }
}

async fn join_captures(
    stdout: Option<JoinHandle<BoundedBuffer>>,
    stderr: Option<JoinHandle<BoundedBuffer>>,
) -> (String, String) {
    tokio::join!(join_capture(stdout), join_capture(stderr))
}

async fn join_capture(task: Option<JoinHandle<BoundedBuffer>>) -> String {
    match task {
        Some(handle) => match handle.await {
            Ok(buffer) => buffer.into_string(),
            Err(e) => {
                warn!(error = %e, "output capture task failed");
                String::new()
            }
        },
        None => String::new(),
    }
}

fn request_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            return;
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "could not signal process; it may have exited already");
    }
}

async fn force_kill(child: &mut Child) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed; process may have exited already");
    }
    child.wait().await
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    let pgid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::killpg(pgid, signal) {
        debug!(pid, ?signal, error = %e, "killpg failed");
    }
}

/// Kills the child's process group if dropped while still armed.
///
/// `kill_on_drop` only reaches the direct child; this also takes out anything
/// it spawned and stops the capture tasks, so a timed-out or cancelled
/// command leaves nothing behind. It stays armed until the output pipes close,
/// not just until the direct child exits.
struct ProcessGroupGuard {
    pid: Option<u32>,
    captures: Vec<AbortHandle>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            captures: Vec::new(),
        }
    }

    fn track<'a, T: 'a>(&mut self, tasks: impl Iterator<Item = &'a JoinHandle<T>>) {
        self.captures.extend(tasks.map(JoinHandle::abort_handle));
    }

    fn terminate_group(&self) {
        if let Some(pid) = self.pid {
            #[cfg(unix)]
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            #[cfg(not(unix))]
            let _ = pid;
        }
    }

    fn kill_group(&self) {
        if let Some(pid) = self.pid {
            #[cfg(unix)]
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            #[cfg(not(unix))]
            let _ = pid;
        }
    }

    fn abort_captures(&mut self) {
        for handle in self.captures.drain(..) {
            handle.abort();
        }
    }

    fn disarm(&mut self) {
        self.pid = None;
        self.captures.clear();
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid {
            debug!(pid, "command dropped before its output closed; killing process group");
            self.kill_group();
        }
        self.abort_captures();
    }
}
