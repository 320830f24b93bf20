// src/exec/cancel.rs

//! Two-stage cancellation shared between a run and its child processes.

use tokio_util::sync::CancellationToken;

/// Cooperative-then-forced cancellation signal.
///
/// - `terminate` asks running processes to stop (SIGTERM on unix) and stops
///   retries/backoff waits.
/// - `kill` force-kills whatever is still running. Raising `kill` also
///   raises `terminate`.
///
/// Cloning is cheap; all clones observe the same tokens.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    terminate: CancellationToken,
    kill: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is raised whenever `self` is, but can also be raised on
    /// its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            terminate: self.terminate.child_token(),
            kill: self.kill.child_token(),
        }
    }

    pub fn request_terminate(&self) {
        self.terminate.cancel();
    }

    pub fn request_kill(&self) {
        self.kill.cancel();
        self.terminate.cancel();
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate.is_cancelled()
    }

    pub fn is_kill_requested(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Resolves once termination (cooperative or forced) was requested.
    pub async fn terminated(&self) {
        self.terminate.cancelled().await
    }

    /// Resolves once a forced kill was requested.
    pub async fn killed(&self) {
        self.kill.cancelled().await
    }
}
