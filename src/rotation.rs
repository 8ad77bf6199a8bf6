//! Identity rotation loop.
//!
//! ```text
//! Idle -> Sleeping -> Rotating -> Reporting -> Sleeping ...
//!                                           \-> Done       (bounded count exhausted)
//! any state ----------------------------------> Cancelled  (token fired)
//! ```
//!
//! The loop is strictly sequential: a cycle's reload and lookups complete
//! before the next sleep begins. Reload failures and missing addresses are
//! logged and the loop carries on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RotationConfig, Settings};
use crate::identity::{IdentityResolver, Resolution};
use crate::lifecycle::{sleep_or_cancel, Cancelled};
use crate::probe::ReachabilityProbe;
use crate::service::{ServiceController, ServiceError};

/// Default deadline for a single reload.
const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// Receives every successfully resolved address after a rotation.
pub trait Reporter: Send + Sync {
    fn report(&self, address: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    Sleeping,
    Rotating,
    Reporting,
    Done,
    Cancelled,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationState::Idle => "idle",
            RotationState::Sleeping => "sleeping",
            RotationState::Rotating => "rotating",
            RotationState::Reporting => "reporting",
            RotationState::Done => "done",
            RotationState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What a finished loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSummary {
    pub final_state: RotationState,
    /// Completed reload+resolve cycles.
    pub cycles: u32,
    /// Cycles that produced an address to report.
    pub reported: u32,
}

pub struct RotationController {
    config: RotationConfig,
    service: Arc<dyn ServiceController>,
    resolver: IdentityResolver,
    reporter: Arc<dyn Reporter>,
    reload_timeout: Duration,
    state: RotationState,
}

impl RotationController {
    pub fn new(
        config: RotationConfig,
        service: Arc<dyn ServiceController>,
        resolver: IdentityResolver,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            service,
            resolver,
            reporter,
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            state: RotationState::Idle,
        }
    }

    /// Give up on a reload that has not returned after `reload_timeout`.
    pub fn with_reload_timeout(mut self, reload_timeout: Duration) -> Self {
        self.reload_timeout = reload_timeout;
        self
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    fn transition(&mut self, next: RotationState) {
        debug!("Rotation state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the loop until the count is exhausted or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> RotationSummary {
        let mut remaining = self.config.count;
        let mut cycles = 0;
        let mut reported = 0;

        let final_state = loop {
            if !self.config.is_unbounded() && remaining == 0 {
                break RotationState::Done;
            }

            let delay = self.config.interval.sample(&mut rand::thread_rng());
            self.transition(RotationState::Sleeping);
            info!(
                "Sleeping for {} seconds before refreshing IP...",
                delay.as_secs()
            );
            if sleep_or_cancel(delay, cancel).await.is_err() {
                break RotationState::Cancelled;
            }

            self.transition(RotationState::Rotating);
            let address = match self.rotate(cancel).await {
                Ok(address) => address,
                Err(Cancelled) => break RotationState::Cancelled,
            };
            cycles += 1;

            self.transition(RotationState::Reporting);
            match address {
                Some(address) => {
                    self.reporter.report(&address);
                    reported += 1;
                }
                None => warn!("Could not determine the new IP address; skipping report"),
            }

            if !self.config.is_unbounded() {
                remaining -= 1;
            }
        };

        self.transition(final_state);
        RotationSummary {
            final_state,
            cycles,
            reported,
        }
    }

    /// Request a new identity and resolve the resulting address.
    async fn rotate(&self, cancel: &CancellationToken) -> Result<Option<String>, Cancelled> {
        info!("Requesting new IP address via Tor...");

        let reload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = timeout(self.reload_timeout, self.service.reload()) => {
                result.unwrap_or_else(|_| {
                    Err(ServiceError::TimedOut {
                        command: format!("{} reload", self.service.name()),
                        timeout: self.reload_timeout,
                    })
                })
            }
        };
        if let Err(e) = reload {
            error!("Failed to reload Tor: {}", e);
        }

        let resolution = self
            .resolver
            .resolve_current(self.service.as_ref(), cancel)
            .await?;
        Ok(resolution.snapshot.address)
    }
}

/// Bring tor up before the first rotation and resolve the starting address.
///
/// A failed start is logged and initialization carries on: lookups go direct
/// while tor is down. In container mode tor is owned by the container and is
/// never started here. Only cancellation ends initialization early.
pub async fn initialize(
    settings: &Settings,
    service: &dyn ServiceController,
    probe: &ReachabilityProbe,
    resolver: &IdentityResolver,
    cancel: &CancellationToken,
) -> Result<Resolution, Cancelled> {
    info!("Initializing environment and checking dependencies...");

    if settings.container_mode {
        info!("Container mode: expecting tor to be started by the container");
    } else {
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = service.start() => result,
        };
        if let Err(e) = started {
            error!("Failed to start Tor service: {}", e);
        }
    }

    if !probe.wait_until_ready(settings.ready_timeout(), cancel).await {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        error!("Tor did not respond in time. IP retrieval may fail.");
    }

    resolver.resolve_current(service, cancel).await
}
