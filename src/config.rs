//! Configuration for tornet.
//!
//! Settings are resolved in layers, later layers winning:
//!
//! 1. Built-in defaults (Tor SOCKS port on `127.0.0.1:9050`, torproject check API)
//! 2. A config file, either given with `--config` or discovered via prefer
//! 3. Environment overrides (`TORNET_SOCKS_ADDR`, `TORNET_TOR_BINARY`, `DOCKER_ENV`)
//!
//! The rotation schedule itself lives in [`RotationConfig`] and is built from
//! CLI flags before the loop starts.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Endpoint that reports the observed address and whether it is a Tor exit.
pub const DEFAULT_VERIFY_URL: &str = "https://check.torproject.org/api/ip";

/// Endpoint that echoes the caller's address as plain text.
pub const DEFAULT_ECHO_URL: &str = "https://api.ipify.org";

/// Errors raised while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid interval '{0}': expected seconds (e.g. 60) or a range (e.g. 60-120)")]
    MalformedInterval(String),

    #[error("Invalid interval range {min}-{max}: lower bound exceeds upper bound")]
    InvertedRange { min: u64, max: u64 },

    #[error("Invalid SOCKS address '{0}'")]
    InvalidSocksAddr(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Name and version of the running tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl ToolInfo {
    /// Tool info for this build.
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Sleep interval between rotations, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSpec {
    /// Always sleep exactly this long.
    Fixed(u64),
    /// Sleep a uniformly drawn duration in `[min, max]` (inclusive).
    Range { min: u64, max: u64 },
}

impl IntervalSpec {
    /// Build a range, rejecting inverted bounds.
    pub fn range(min: u64, max: u64) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedRange { min, max });
        }
        Ok(IntervalSpec::Range { min, max })
    }

    /// Draw the next sleep duration.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let secs = match *self {
            IntervalSpec::Fixed(secs) => secs,
            IntervalSpec::Range { min, max } => rng.gen_range(min..=max),
        };
        Duration::from_secs(secs)
    }
}

impl FromStr for IntervalSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedInterval(s.to_string());
        let parse = |part: &str| part.trim().parse::<u64>().map_err(|_| malformed());

        let parts: Vec<&str> = s.trim().split('-').collect();
        match parts.as_slice() {
            [secs] => Ok(IntervalSpec::Fixed(parse(secs)?)),
            [min, max] => IntervalSpec::range(parse(min)?, parse(max)?),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalSpec::Fixed(secs) => write!(f, "{}", secs),
            IntervalSpec::Range { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

/// Rotation schedule. Fixed once the loop starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationConfig {
    pub interval: IntervalSpec,
    /// Number of rotations to perform; 0 means run until cancelled.
    pub count: u32,
}

impl RotationConfig {
    pub fn new(interval: IntervalSpec, count: u32) -> Self {
        Self { interval, count }
    }

    /// Parse an interval string and build the schedule.
    pub fn parse(interval: &str, count: u32) -> Result<Self, ConfigError> {
        Ok(Self::new(interval.parse()?, count))
    }

    pub fn is_unbounded(&self) -> bool {
        self.count == 0
    }
}

/// Runtime settings for reaching Tor and the address endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local Tor SOCKS listener.
    pub socks_addr: SocketAddr,
    /// Host the readiness probe connects to through Tor.
    pub probe_host: String,
    pub probe_port: u16,
    /// Tor-aware address check (JSON with `IP` and `IsTor`).
    pub verify_url: String,
    /// Plain-text address echo used when Tor is not running.
    pub echo_url: String,
    pub request_timeout_secs: u64,
    pub probe_attempt_timeout_secs: u64,
    pub probe_retry_delay_secs: u64,
    pub ready_timeout_secs: u64,
    /// Delay between the two proxied lookups used for stale circuit detection.
    pub settle_delay_secs: u64,
    /// Deadline for each service manager command (start, stop, reload).
    pub command_timeout_secs: u64,
    /// Path to tor binary (default: search PATH for "tor")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor_binary: Option<PathBuf>,
    /// Running inside a container: signal tor directly instead of using a service manager.
    pub container_mode: bool,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socks_addr: SocketAddr::from(([127, 0, 0, 1], 9050)),
            probe_host: "api.ipify.org".to_string(),
            probe_port: 80,
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            request_timeout_secs: 10,
            probe_attempt_timeout_secs: 5,
            probe_retry_delay_secs: 2,
            ready_timeout_secs: 30,
            settle_delay_secs: 5,
            command_timeout_secs: 60,
            tor_binary: None,
            container_mode: false,
            source_path: None,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, or auto-discover a `tornet.*` file.
    ///
    /// An explicit path that cannot be read or parsed is an error. A discovered
    /// file that fails to parse is logged and ignored.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match explicit {
            Some(path) => Self::load_from_path(path).await?,
            None => Self::discover().await,
        };
        Ok(settings.with_env_overrides())
    }

    async fn discover() -> Self {
        match prefer::load("tornet").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(settings) => settings,
                    Err(e) => {
                        tracing::warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load settings from a specific file path.
    /// Supports TOML and JSON based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut settings = Self::parse(path, &contents)?;
        settings.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        match path.extension().and_then(|e| e.to_str()).unwrap_or("toml") {
            "json" => serde_json::from_str(contents).map_err(|e| parse_err(e.to_string())),
            _ => toml::from_str(contents).map_err(|e| parse_err(e.to_string())),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("TORNET_SOCKS_ADDR").filter(|v| !v.is_empty()) {
            match parse_socks_addr(&addr) {
                Ok(addr) => self.socks_addr = addr,
                Err(e) => tracing::warn!("{}; keeping {}", e, self.socks_addr),
            }
        }

        if let Some(path) = lookup("TORNET_TOR_BINARY").filter(|v| !v.is_empty()) {
            self.tor_binary = Some(PathBuf::from(path));
        }

        // Any non-empty DOCKER_ENV marks a container deployment
        if lookup("DOCKER_ENV").is_some_and(|v| !v.is_empty()) {
            self.container_mode = true;
        }

        self
    }

    /// SOCKS URL for HTTP clients. Uses `socks5h` so DNS resolves inside Tor.
    pub fn socks_proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks_addr)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_attempt_timeout_secs)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_secs(self.probe_retry_delay_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Deadline for one whole reload. A Windows reload kills tor, respawns it
    /// and waits for readiness, so it gets the readiness timeout on top.
    pub fn reload_timeout(&self) -> Duration {
        self.command_timeout() + self.ready_timeout()
    }
}

fn parse_socks_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .trim_start_matches("socks5h://")
        .trim_start_matches("socks5://")
        .parse()
        .map_err(|_| ConfigError::InvalidSocksAddr(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_fixed_interval() {
        assert_eq!("60".parse::<IntervalSpec>().unwrap(), IntervalSpec::Fixed(60));
        assert_eq!(" 5 ".parse::<IntervalSpec>().unwrap(), IntervalSpec::Fixed(5));
    }

    #[test]
    fn test_parse_range_interval() {
        assert_eq!(
            "60-120".parse::<IntervalSpec>().unwrap(),
            IntervalSpec::Range { min: 60, max: 120 }
        );
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = "120-60".parse::<IntervalSpec>().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvertedRange { min: 120, max: 60 }
        ));
        assert!(RotationConfig::parse("9-3", 3).is_err());
    }

    #[test]
    fn test_malformed_intervals() {
        for input in ["", "abc", "60-", "-60", "1-2-3", "1.5", "ten-20"] {
            assert!(
                matches!(
                    input.parse::<IntervalSpec>(),
                    Err(ConfigError::MalformedInterval(_))
                ),
                "expected {:?} to be rejected",
                input
            );
        }
    }

    #[test]
    fn test_fixed_interval_samples_verbatim() {
        let mut rng = StdRng::seed_from_u64(7);
        let interval = IntervalSpec::Fixed(42);
        for _ in 0..100 {
            assert_eq!(interval.sample(&mut rng), Duration::from_secs(42));
        }
    }

    #[test]
    fn test_range_samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let interval = IntervalSpec::range(3, 9).unwrap();
        for _ in 0..1000 {
            let secs = interval.sample(&mut rng).as_secs();
            assert!((3..=9).contains(&secs), "sampled {}", secs);
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let interval = IntervalSpec::range(10, 10).unwrap();
        assert_eq!(interval.sample(&mut rng), Duration::from_secs(10));
    }

    #[test]
    fn test_interval_display_round_trips_cli_form() {
        assert_eq!(IntervalSpec::Fixed(60).to_string(), "60");
        assert_eq!(IntervalSpec::range(1, 2).unwrap().to_string(), "1-2");
    }

    #[test]
    fn test_zero_count_is_unbounded() {
        assert!(RotationConfig::parse("60", 0).unwrap().is_unbounded());
        assert!(!RotationConfig::parse("60", 3).unwrap().is_unbounded());
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.socks_proxy_url(), "socks5h://127.0.0.1:9050");
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.settle_delay(), Duration::from_secs(5));
        assert_eq!(settings.command_timeout(), Duration::from_secs(60));
        assert_eq!(settings.reload_timeout(), Duration::from_secs(90));
        assert!(!settings.container_mode);
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default().with_overrides_from(|key| match key {
            "TORNET_SOCKS_ADDR" => Some("socks5://127.0.0.1:9150".to_string()),
            "DOCKER_ENV" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(settings.socks_addr.port(), 9150);
        assert!(settings.container_mode);
        assert!(settings.tor_binary.is_none());
    }

    #[test]
    fn test_empty_docker_env_is_ignored() {
        let settings = Settings::default()
            .with_overrides_from(|key| (key == "DOCKER_ENV").then(String::new));
        assert!(!settings.container_mode);
    }

    #[test]
    fn test_invalid_socks_override_keeps_default() {
        let settings = Settings::default()
            .with_overrides_from(|key| (key == "TORNET_SOCKS_ADDR").then(|| "nope".to_string()));
        assert_eq!(settings.socks_addr, SocketAddr::from(([127, 0, 0, 1], 9050)));
    }

    #[test]
    fn test_parse_toml_partial() {
        let settings = Settings::parse(
            Path::new("tornet.toml"),
            "socks_addr = \"127.0.0.1:9150\"\nsettle_delay_secs = 1\ncommand_timeout_secs = 15\n",
        )
        .unwrap();
        assert_eq!(settings.socks_addr.port(), 9150);
        assert_eq!(settings.settle_delay_secs, 1);
        assert_eq!(settings.command_timeout(), Duration::from_secs(15));
        assert_eq!(settings.verify_url, DEFAULT_VERIFY_URL);
    }

    #[test]
    fn test_parse_json() {
        let settings =
            Settings::parse(Path::new("tornet.json"), r#"{"container_mode": true}"#).unwrap();
        assert!(settings.container_mode);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Settings::parse(Path::new("bad.toml"), "socks_addr = 5").unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
