//! Process lifecycle: signal handling and the one-shot Tor stop.
//!
//! Signals never stop tor themselves. They cancel a shared
//! [`CancellationToken`], which every suspension point in the rotation loop
//! races against. The supervisor then runs the stop sequence exactly once
//! from [`LifecycleSupervisor::supervise`], whatever way the work ended.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::ServiceController;

/// Handle delivered signals by name until the sender side closes.
///
/// The first signal cancels `cancel`. Every signal received after the token
/// is already cancelled is passed to `escalate`.
async fn watch_signals<F>(
    mut signals: mpsc::UnboundedReceiver<&'static str>,
    cancel: CancellationToken,
    mut escalate: F,
) where
    F: FnMut(&'static str),
{
    while let Some(name) = signals.recv().await {
        if cancel.is_cancelled() {
            warn!("Received {} while already shutting down, exiting now", name);
            escalate(name);
        } else {
            info!("Received {}, shutting down", name);
            cancel.cancel();
        }
    }
}

/// Marker returned when a cancellation token fires at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Initializing = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Initializing,
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Result of a [`LifecycleSupervisor::shutdown`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call stopped the service.
    Stopped,
    /// This call ran the stop sequence but the service reported an error.
    Failed,
    /// Another call already ran (or is running) the stop sequence.
    AlreadyStopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("supervised task panicked: {0}")]
    Panicked(String),

    #[error("supervised task was aborted")]
    Aborted,
}

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct LifecycleSupervisor {
    service: Arc<dyn ServiceController>,
    cancel: CancellationToken,
    state: AtomicU8,
    handlers_installed: AtomicBool,
    stop_timeout: Duration,
}

impl LifecycleSupervisor {
    pub fn new(service: Arc<dyn ServiceController>, cancel: CancellationToken) -> Self {
        Self {
            service,
            cancel,
            state: AtomicU8::new(LifecycleState::Initializing as u8),
            handlers_installed: AtomicBool::new(false),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Give up on a stop that has not returned after `stop_timeout`.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Token cancelled on interrupt, termination, or shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register interrupt and termination handlers. Later calls are no-ops.
    ///
    /// The first signal cancels the shared token. A signal arriving once
    /// shutdown is already under way, for instance while a stop hangs, exits
    /// the process immediately with status 130.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_handlers(&self) -> std::io::Result<()> {
        if self.handlers_installed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigquit = signal(SignalKind::quit())?;

            tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        Some(()) = sigint.recv() => "SIGINT",
                        Some(()) = sigterm.recv() => "SIGTERM",
                        Some(()) = sigquit.recv() => "SIGQUIT",
                        else => break,
                    };
                    if tx.send(name).is_err() {
                        break;
                    }
                }
            });
        }

        #[cfg(windows)]
        {
            let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
            let mut ctrl_break = tokio::signal::windows::ctrl_break()?;

            tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        Some(()) = ctrl_c.recv() => "Ctrl-C",
                        Some(()) = ctrl_break.recv() => "Ctrl-Break",
                        else => break,
                    };
                    if tx.send(name).is_err() {
                        break;
                    }
                }
            });
        }

        #[cfg(not(any(unix, windows)))]
        drop(tx);

        tokio::spawn(watch_signals(rx, self.cancel.clone(), |_| std::process::exit(130)));
        Ok(())
    }

    /// Run `work` to completion on its own task, then always run the stop sequence.
    ///
    /// A panic inside `work` is contained and reported as
    /// [`LifecycleError::Panicked`] after tor has been stopped.
    pub async fn supervise<F>(&self, work: F) -> Result<F::Output, LifecycleError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let _ = self.state.compare_exchange(
            LifecycleState::Initializing as u8,
            LifecycleState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let joined = tokio::spawn(work).await;
        self.shutdown().await;

        joined.map_err(|e| {
            if e.is_panic() {
                let message = panic_message(e.into_panic());
                error!("Rotation task panicked: {}", message);
                LifecycleError::Panicked(message)
            } else {
                LifecycleError::Aborted
            }
        })
    }

    /// Stop the service. Only the first caller runs the stop; every later or
    /// concurrent caller returns [`StopOutcome::AlreadyStopped`] immediately.
    pub async fn shutdown(&self) -> StopOutcome {
        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match LifecycleState::from_u8(current) {
                    LifecycleState::Initializing | LifecycleState::Running => {
                        Some(LifecycleState::Stopping as u8)
                    }
                    LifecycleState::Stopping | LifecycleState::Stopped => None,
                }
            })
            .is_ok();

        if !claimed {
            return StopOutcome::AlreadyStopped;
        }

        self.cancel.cancel();

        let outcome = match tokio::time::timeout(self.stop_timeout, self.service.stop()).await {
            Ok(Ok(())) => {
                info!("Tor service stopped ({})", self.service.name());
                StopOutcome::Stopped
            }
            Ok(Err(e)) => {
                error!("Failed to stop Tor: {}", e);
                StopOutcome::Failed
            }
            Err(_) => {
                error!(
                    "Tor did not stop within {}s, giving up",
                    self.stop_timeout.as_secs()
                );
                StopOutcome::Failed
            }
        };

        self.state
            .store(LifecycleState::Stopped as u8, Ordering::Release);
        outcome
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
