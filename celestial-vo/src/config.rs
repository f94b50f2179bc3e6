//! Client configuration.
//!
//! Resolved in three layers: built-in defaults, an optional JSON file, then
//! environment overrides (`VO_REGISTRY_URL`, `VO_TIMEOUT_SECS`, `VO_WORKERS`).
//! The CLI applies its own flags on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::errors::{VoError, VoResult};

/// GAVO's RegTAP endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "http://reg.g-vo.org/tap";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// TAP root of the registry used for service discovery.
    pub registry_url: String,
    pub user_agent: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Delay between async job phase polls.
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for an async job before aborting it.
    pub max_wait_secs: u64,
    /// Worker threads for batch queries and schema fetching.
    pub workers: usize,
    /// Sent as `MAXREC` to TAP services when set.
    pub max_records: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            user_agent: format!("celestial-vo/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
            poll_interval_ms: 1000,
            max_wait_secs: 600,
            workers: 4,
            max_records: None,
        }
    }
}

impl ClientConfig {
    /// Reads a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> VoResult<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `VO_*` environment overrides.
    pub fn with_env_overrides(self) -> VoResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> VoResult<Self> {
        if let Some(url) = lookup("VO_REGISTRY_URL") {
            self.registry_url = url;
        }
        if let Some(secs) = lookup("VO_TIMEOUT_SECS") {
            self.timeout_secs = secs
                .trim()
                .parse()
                .map_err(|_| VoError::config(format!("VO_TIMEOUT_SECS is not a number: {}", secs)))?;
        }
        if let Some(workers) = lookup("VO_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| VoError::config(format!("VO_WORKERS is not a number: {}", workers)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> VoResult<()> {
        if self.registry_url.trim().is_empty() {
            return Err(VoError::config("registry_url is empty"));
        }
        if self.timeout_secs == 0 {
            return Err(VoError::config("timeout_secs must be positive"));
        }
        if self.workers == 0 {
            return Err(VoError::config("workers must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(VoError::config("poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}
