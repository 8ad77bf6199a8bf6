//! SOCKS-level readiness probe for the local Tor relay.
//!
//! Tor accepting TCP on its SOCKS port does not mean it can build circuits,
//! so each attempt performs a full SOCKS5 CONNECT to an external host.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_socks::tcp::Socks5Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Settings;

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    proxy: SocketAddr,
    target_host: String,
    target_port: u16,
    attempt_timeout: Duration,
    retry_delay: Duration,
}

impl ReachabilityProbe {
    /// Probe `target_host:target_port` through the SOCKS proxy at `proxy`.
    ///
    /// Attempts time out after 5 seconds and are retried every 2 seconds.
    pub fn new(proxy: SocketAddr, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            proxy,
            target_host: target_host.into(),
            target_port,
            attempt_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.socks_addr,
            settings.probe_host.clone(),
            settings.probe_port,
        )
        .with_timings(
            settings.probe_attempt_timeout(),
            settings.probe_retry_delay(),
        )
    }

    pub fn with_timings(mut self, attempt_timeout: Duration, retry_delay: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self.retry_delay = retry_delay;
        self
    }

    /// Make one connection attempt, bounded by the per-attempt timeout.
    pub async fn probe(&self) -> ProbeResult {
        let target = (self.target_host.as_str(), self.target_port);
        let reachable = match timeout(
            self.attempt_timeout,
            Socks5Stream::connect(self.proxy, target),
        )
        .await
        {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!("SOCKS probe via {} failed: {}", self.proxy, e);
                false
            }
            Err(_) => {
                debug!(
                    "SOCKS probe via {} timed out after {:?}",
                    self.proxy, self.attempt_timeout
                );
                false
            }
        };

        ProbeResult {
            reachable,
            observed_at: Utc::now(),
        }
    }

    /// Retry [`probe`](Self::probe) until it succeeds, `deadline` elapses, or
    /// `cancel` fires.
    ///
    /// The deadline is wall-clock: an attempt still in flight when it passes is
    /// abandoned.
    pub async fn wait_until_ready(&self, deadline: Duration, cancel: &CancellationToken) -> bool {
        info!(
            "Waiting for Tor SOCKS proxy to become responsive... (timeout: {}s)",
            deadline.as_secs()
        );
        let deadline = Instant::now() + deadline;

        while Instant::now() < deadline {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                result = timeout_at(deadline, self.probe()) => result,
            };

            match attempt {
                Ok(result) if result.reachable => {
                    info!("Tor SOCKS5 proxy is responding.");
                    return true;
                }
                Ok(_) => {}
                Err(_) => break,
            }

            let next = (Instant::now() + self.retry_delay).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(next) => {}
            }
        }

        error!("Timed out waiting for Tor SOCKS5 proxy.");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Address nothing listens on.
    async fn closed_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    /// Minimal SOCKS5 server that accepts every CONNECT without dialing out.
    async fn spawn_socks_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_socks(stream));
            }
        });
        addr
    }

    async fn handle_socks(mut stream: TcpStream) -> std::io::Result<()> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;
        let mut methods = vec![0u8; header[1] as usize];
        stream.read_exact(&mut methods).await?;
        stream.write_all(&[0x05, 0x00]).await?;

        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await?;
        match request[3] {
            0x01 => {
                let mut rest = [0u8; 6];
                stream.read_exact(&mut rest).await?;
            }
            0x03 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut rest = vec![0u8; len[0] as usize + 2];
                stream.read_exact(&mut rest).await?;
            }
            _ => {
                let mut rest = [0u8; 18];
                stream.read_exact(&mut rest).await?;
            }
        }
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_probe_succeeds_through_socks_server() {
        let proxy = spawn_socks_server().await;
        let probe = ReachabilityProbe::new(proxy, "api.ipify.org", 80);
        assert!(probe.probe().await.reachable);
    }

    #[tokio::test]
    async fn test_wait_until_ready_returns_true_on_first_success() {
        let proxy = spawn_socks_server().await;
        let probe = ReachabilityProbe::new(proxy, "api.ipify.org", 80);
        let started = std::time::Instant::now();
        assert!(
            probe
                .wait_until_ready(Duration::from_secs(10), &CancellationToken::new())
                .await
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up_at_deadline() {
        let probe = ReachabilityProbe::new(closed_addr().await, "api.ipify.org", 80)
            .with_timings(Duration::from_millis(100), Duration::from_millis(50));
        let started = std::time::Instant::now();
        assert!(
            !probe
                .wait_until_ready(Duration::from_millis(400), &CancellationToken::new())
                .await
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_wait_until_ready_stops_on_cancel() {
        let probe = ReachabilityProbe::new(closed_addr().await, "api.ipify.org", 80)
            .with_timings(Duration::from_millis(100), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!probe.wait_until_ready(Duration::from_secs(60), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_reports_not_reachable() {
        let probe = ReachabilityProbe::new(closed_addr().await, "api.ipify.org", 80);
        let result = probe.probe().await;
        assert!(!result.reachable);
    }
}
