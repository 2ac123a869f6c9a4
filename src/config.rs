//! Load balancer configuration
//!
//! Parsed from YAML. Only `backends` is required (it may be an empty list);
//! every other section falls back to the defaults below.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TOLLGATE_CONFIG";

/// Path used when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend base URLs, e.g. `http://localhost:9001`
    pub backends: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    /// How long in-flight requests may run after shutdown starts
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Token bucket parameters applied to every client.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_probe_path")]
    pub path: String,
}

/// Idle rate-limit bucket eviction.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Upstream forwarding timeouts.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_capacity() -> u32 {
    10
}

fn default_refill_rate() -> u32 {
    5
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    2
}

fn default_probe_path() -> String {
    "/health".to_string()
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
            path: default_probe_path(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_yaml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw).context("failed to parse YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the background loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.health_check.interval_secs == 0 {
            bail!("health_check.interval_secs must be greater than zero");
        }
        if self.cleanup.interval_secs == 0 {
            bail!("cleanup.interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Config file location: `$TOLLGATE_CONFIG`, or `configs/config.yaml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
