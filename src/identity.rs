//! Externally visible address lookup.
//!
//! Through Tor the torproject check API is used, which also says whether the
//! address is a known exit node. Without Tor a plain echo endpoint is used.
//! Every failure is absorbed into "no address"; callers never see transport
//! errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Settings, ToolInfo};
use crate::lifecycle::{sleep_or_cancel, Cancelled};
use crate::service::ServiceController;

/// One address observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub address: Option<String>,
    pub via_proxy: bool,
    pub captured_at: DateTime<Utc>,
}

/// Result of [`IdentityResolver::resolve_current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub snapshot: IdentitySnapshot,
    /// Two proxied lookups disagreed without a rotation in between.
    pub stale: bool,
}

impl Resolution {
    pub fn address(&self) -> Option<&str> {
        self.snapshot.address.as_deref()
    }
}

/// Source of raw address lookups.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    /// Look up the current address, through Tor when `via_proxy` is set.
    /// `None` means unknown.
    async fn lookup(&self, via_proxy: bool) -> Option<String>;
}

/// Response body of the torproject check API.
#[derive(Debug, Deserialize)]
struct TorCheckResponse {
    #[serde(rename = "IP")]
    ip: Option<String>,
    #[serde(rename = "IsTor", default)]
    is_tor: bool,
}

/// Trim and drop empty addresses.
fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// HTTP lookups against the verification and echo endpoints.
pub struct HttpAddressLookup {
    proxied: Client,
    direct: Client,
    verify_url: String,
    echo_url: String,
}

impl HttpAddressLookup {
    pub fn new(settings: &Settings, tool: &ToolInfo) -> reqwest::Result<Self> {
        let user_agent = format!("{}/{}", tool.name, tool.version);

        let proxied = Client::builder()
            .user_agent(user_agent.as_str())
            .timeout(settings.request_timeout())
            .proxy(Proxy::all(settings.socks_proxy_url())?)
            .build()?;

        let direct = Client::builder()
            .user_agent(user_agent.as_str())
            .timeout(settings.request_timeout())
            .no_proxy()
            .build()?;

        Ok(Self {
            proxied,
            direct,
            verify_url: settings.verify_url.clone(),
            echo_url: settings.echo_url.clone(),
        })
    }
}

/// GET the torproject check API and return the reported address.
async fn fetch_tor_check(client: &Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    let body: TorCheckResponse = match response {
        Ok(response) => match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to fetch Tor IP from {}: {}", url, e);
                return None;
            }
        },
        Err(e) => {
            error!("Failed to fetch Tor IP from {}: {}", url, e);
            return None;
        }
    };

    let ip = body.ip.as_deref().and_then(normalize_address);
    if let Some(ref ip) = ip {
        if !body.is_tor {
            warn!("The IP {} is not recognized as a Tor exit node.", ip);
        }
    }
    ip
}

/// GET a plain-text echo endpoint and return the trimmed body.
async fn fetch_echo(client: &Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match response {
        Ok(response) => match response.text().await {
            Ok(text) => normalize_address(&text),
            Err(e) => {
                error!("Failed to read IP from {}: {}", url, e);
                None
            }
        },
        Err(e) => {
            error!(
                "Having trouble fetching the IP address ({}). Please check your internet connection.",
                e
            );
            None
        }
    }
}

#[async_trait]
impl AddressLookup for HttpAddressLookup {
    async fn lookup(&self, via_proxy: bool) -> Option<String> {
        if via_proxy {
            fetch_tor_check(&self.proxied, &self.verify_url).await
        } else {
            fetch_echo(&self.direct, &self.echo_url).await
        }
    }
}

/// Resolves the current identity and detects stale circuits.
#[derive(Clone)]
pub struct IdentityResolver {
    lookup: Arc<dyn AddressLookup>,
    settle_delay: Duration,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn AddressLookup>, settle_delay: Duration) -> Self {
        Self {
            lookup,
            settle_delay,
        }
    }

    /// Single lookup, cancellable.
    pub async fn resolve(
        &self,
        via_proxy: bool,
        cancel: &CancellationToken,
    ) -> Result<IdentitySnapshot, Cancelled> {
        let address = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            address = self.lookup.lookup(via_proxy) => address,
        };

        Ok(IdentitySnapshot {
            address: address.filter(|a| !a.is_empty()),
            via_proxy,
            captured_at: Utc::now(),
        })
    }

    /// Resolve the address the outside world currently sees.
    ///
    /// With tor running, looks up twice through Tor separated by the settle
    /// delay and prefers the later answer. Otherwise looks up directly once.
    pub async fn resolve_current(
        &self,
        service: &dyn ServiceController,
        cancel: &CancellationToken,
    ) -> Result<Resolution, Cancelled> {
        info!("Fetching current IP address...");

        if !service.is_running().await {
            let snapshot = self.resolve(false, cancel).await?;
            return Ok(Resolution {
                snapshot,
                stale: false,
            });
        }

        let first = self.resolve(true, cancel).await?;
        sleep_or_cancel(self.settle_delay, cancel).await?;
        let second = self.resolve(true, cancel).await?;

        let stale = match (&first.address, &second.address) {
            (Some(a), Some(b)) if a != b => {
                warn!("Stale Tor circuit detected: {} → {}", a, b);
                true
            }
            _ => false,
        };

        let snapshot = if second.address.is_some() { second } else { first };
        Ok(Resolution { snapshot, stale })
    }
}
