use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use dagrun::dag::ScheduledTask;
use dagrun::engine::{Orchestrator, RuntimeEvent};
use dagrun::errors::Result;
use dagrun::exec::{
    Backoff, CancelSignal, CommandOutput, CommandStatus, ExecFailure, ExecutorBackend,
    RetryNotice, RetryPolicy, TaskReport,
};

/// What one attempt of a scripted task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedAttempt {
    Succeed,
    Fail(i32),
    TimeOut,
}

#[derive(Debug, Default)]
struct LogInner {
    dispatched: Vec<String>,
    finished: Vec<String>,
    running: usize,
    peak: usize,
}

/// Shared record of what the fake executor did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<LogInner>>);

impl ExecutionLog {
    pub fn dispatched(&self) -> Vec<String> {
        self.0.lock().unwrap().dispatched.clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.0.lock().unwrap().finished.clone()
    }

    /// Highest number of tasks executing at the same time.
    pub fn peak_running(&self) -> usize {
        self.0.lock().unwrap().peak
    }

    fn start(&self, task: &str) {
        let mut inner = self.0.lock().unwrap();
        inner.dispatched.push(task.to_string());
        inner.running += 1;
        inner.peak = inner.peak.max(inner.running);
    }

    fn finish(&self, task: &str) {
        let mut inner = self.0.lock().unwrap();
        inner.finished.push(task.to_string());
        inner.running -= 1;
    }
}

/// A fake executor that:
/// - records which tasks were "run" and how many overlapped
/// - plays back a per-task script of attempt outcomes (success by default)
/// - reports retries and completion like the real executor does
///
/// Each attempt takes the task's delay; a forced kill on the shared cancel
/// signal cuts it short.
pub struct ScriptedExecutor {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    cancel: CancelSignal,
    scripts: HashMap<String, VecDeque<ScriptedAttempt>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    log: ExecutionLog,
}

impl ScriptedExecutor {
    pub fn new(runtime_tx: mpsc::UnboundedSender<RuntimeEvent>, cancel: CancelSignal) -> Self {
        Self {
            runtime_tx,
            cancel,
            scripts: HashMap::new(),
            delays: HashMap::new(),
            default_delay: Duration::from_millis(5),
            log: ExecutionLog::default(),
        }
    }

    pub fn for_orchestrator(orchestrator: &Orchestrator) -> Self {
        Self::new(orchestrator.runtime_sender(), orchestrator.cancel_signal())
    }

    pub fn script(
        mut self,
        task: &str,
        attempts: impl IntoIterator<Item = ScriptedAttempt>,
    ) -> Self {
        self.scripts
            .insert(task.to_string(), attempts.into_iter().collect());
        self
    }

    pub fn delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for task in tasks {
                let script = self.scripts.remove(&task.name).unwrap_or_default();
                let delay = self
                    .delays
                    .get(&task.name)
                    .copied()
                    .unwrap_or(self.default_delay);

                self.log.start(&task.name);
                tokio::spawn(run_scripted(
                    task,
                    script,
                    delay,
                    self.cancel.clone(),
                    self.runtime_tx.clone(),
                    self.log.clone(),
                ));
            }
            Ok(())
        })
    }
}

async fn run_scripted(
    task: ScheduledTask,
    mut script: VecDeque<ScriptedAttempt>,
    delay: Duration,
    cancel: CancelSignal,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    log: ExecutionLog,
) {
    let started = Instant::now();
    let name = task.name.clone();
    let policy = RetryPolicy::new(task.retries).with_backoff(Backoff::none());

    let outcome = policy
        .run(
            &cancel,
            |notice: RetryNotice<'_, ExecFailure>| {
                let _ = runtime_tx.send(RuntimeEvent::TaskRetrying {
                    task: name.clone(),
                    attempt: notice.attempt,
                    delay: notice.delay,
                    error: notice.error.to_string(),
                });
            },
            |_| {
                let next = script.pop_front().unwrap_or(ScriptedAttempt::Succeed);
                let cancel = cancel.clone();
                let name = name.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.killed() => {
                            return Err(ExecFailure::Cancelled(output(
                                &name,
                                CommandStatus::Cancelled { forced: true },
                                delay,
                            )));
                        }
                    }
                    match next {
                        ScriptedAttempt::Succeed => {
                            Ok(output(&name, CommandStatus::Exited(0), delay))
                        }
                        ScriptedAttempt::Fail(code) => Err(ExecFailure::NonZeroExit(output(
                            &name,
                            CommandStatus::Exited(code),
                            delay,
                        ))),
                        ScriptedAttempt::TimeOut => Err(ExecFailure::Timeout(delay)),
                    }
                }
            },
        )
        .await;

    log.finish(&task.name);
    let _ = runtime_tx.send(RuntimeEvent::TaskCompleted {
        task: task.name,
        report: TaskReport {
            attempts: outcome.attempts,
            result: outcome.result,
            duration: started.elapsed(),
        },
    });
}

fn output(task: &str, status: CommandStatus, duration: Duration) -> CommandOutput {
    CommandOutput {
        status,
        stdout: format!("ran {task}\n"),
        stderr: String::new(),
        duration,
    }
}
