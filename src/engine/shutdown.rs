// src/engine/shutdown.rs

//! Two-stage shutdown.
//!
//! The first interruption stops admission, skips everything not yet started
//! and asks running processes to terminate. A second interruption, or the
//! grace period running out, force-kills whatever is left.
//!
//! [`ShutdownController`] is the pure decision part used by the core;
//! [`ShutdownHandle`] and [`spawn_signal_listener`] feed interruptions into
//! the runtime loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    ShuttingDown,
    Terminated,
}

/// What the core should do about an interruption or timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    BeginGraceful { grace: Duration },
    ForceKill,
    Ignore,
}

#[derive(Debug)]
pub struct ShutdownController {
    phase: ShutdownPhase,
    grace_period: Duration,
    forced: bool,
}

impl ShutdownController {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            phase: ShutdownPhase::Running,
            grace_period,
            forced: false,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn on_interrupt(&mut self) -> ShutdownAction {
        match self.phase {
            ShutdownPhase::Running => {
                self.phase = ShutdownPhase::ShuttingDown;
                ShutdownAction::BeginGraceful {
                    grace: self.grace_period,
                }
            }
            ShutdownPhase::ShuttingDown => self.escalate(),
            ShutdownPhase::Terminated => ShutdownAction::Ignore,
        }
    }

    pub fn on_grace_elapsed(&mut self) -> ShutdownAction {
        match self.phase {
            ShutdownPhase::ShuttingDown => self.escalate(),
            _ => ShutdownAction::Ignore,
        }
    }

    /// The run is over; later interruptions are ignored.
    pub fn finish(&mut self) {
        self.phase = ShutdownPhase::Terminated;
    }

    fn escalate(&mut self) -> ShutdownAction {
        if self.forced {
            ShutdownAction::Ignore
        } else {
            self.forced = true;
            ShutdownAction::ForceKill
        }
    }
}

/// Requests shutdown of a running orchestration from anywhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ShutdownHandle {
    pub fn new(tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` if the run has already ended.
    pub fn request(&self) -> bool {
        self.tx.send(RuntimeEvent::ShutdownRequested).is_ok()
    }
}

/// Forward Ctrl-C (and SIGTERM on unix) to `handle`, every time one arrives.
///
/// The task ends when the run is gone.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler");
                None
            }
        };

        loop {
            #[cfg(unix)]
            let received = next_signal(&mut sigterm).await;
            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.map(|_| "interrupt");

            match received {
                Ok(kind) => {
                    info!(signal = kind, "shutdown signal received");
                    if !handle.request() {
                        debug!("run already finished; signal listener exiting");
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "signal listener failed");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
async fn next_signal(
    sigterm: &mut Option<tokio::signal::unix::Signal>,
) -> std::io::Result<&'static str> {
    match sigterm {
        Some(term) => tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "interrupt"),
            _ = term.recv() => Ok("terminate"),
        },
        None => tokio::signal::ctrl_c().await.map(|_| "interrupt"),
    }
}
