//! Engine configuration
//!
//! Timeouts are expressed as a read budget and a write budget, multiplied by a
//! per-step scale factor. Multi-object waits additionally scale with the number
//! of objects being waited on.
//!
//! Resolution order: explicit file, then the file named by `TKE_ENGINE_CONFIG`,
//! then defaults. Individual `TKE_*_SECS` variables override the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Environment variable naming a YAML config file
pub const CONFIG_PATH_ENV: &str = "TKE_ENGINE_CONFIG";
/// Environment override for the poll interval
pub const POLL_INTERVAL_ENV: &str = "TKE_POLL_INTERVAL_SECS";
/// Environment override for the read budget
pub const READ_TIMEOUT_ENV: &str = "TKE_READ_TIMEOUT_SECS";
/// Environment override for the write budget
pub const WRITE_TIMEOUT_ENV: &str = "TKE_WRITE_TIMEOUT_SECS";

/// Tunables for one convergence engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Fixed sleep between status polls
    pub poll_interval_secs: u64,
    /// Base budget for read-side waits
    pub read_timeout_secs: u64,
    /// Base budget for retrying mutating calls
    pub write_timeout_secs: u64,
    /// Read budget multiplier for cluster creation and upgrade
    pub cluster_scale: u32,
    /// Read budget multiplier for endpoint provisioning
    pub endpoint_scale: u32,
    /// Read budget multiplier per node waited on
    pub per_node_scale: u32,
    /// Read budget multiplier for add-on install/update/delete
    pub addon_scale: u32,
    /// How long "not found" right after a create is treated as propagation delay
    pub not_found_grace_secs: u64,
    /// Backoff for retrying mutating calls
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            read_timeout_secs: 180,
            write_timeout_secs: 300,
            cluster_scale: 10,
            endpoint_scale: 10,
            per_node_scale: 2,
            addon_scale: 5,
            not_found_grace_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a config document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("EngineConfig", e.to_string()))
    }

    /// Load a config document from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&contents)
    }

    /// Resolve the effective configuration from the process environment
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Resolve the effective configuration with an injectable variable lookup
    pub fn resolve_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| lookup(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading engine config");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        if let Some(secs) = parse_secs(&lookup, POLL_INTERVAL_ENV)? {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, READ_TIMEOUT_ENV)? {
            config.read_timeout_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, WRITE_TIMEOUT_ENV)? {
            config.write_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the poller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::config("pollIntervalSecs must be greater than zero"));
        }
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        if self.poll_interval_secs > self.read_timeout_secs {
            return Err(Error::config(format!(
                "pollIntervalSecs ({}) exceeds readTimeoutSecs ({})",
                self.poll_interval_secs, self.read_timeout_secs
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config("retry.backoffMultiplier must be at least 1.0"));
        }
        Ok(())
    }

    /// Sleep between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Base read budget
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Budget for retrying one mutating call
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Budget for waiting on the control plane
    pub fn cluster_budget(&self) -> Duration {
        self.read_timeout().saturating_mul(self.cluster_scale)
    }

    /// Budget for waiting on one endpoint
    pub fn endpoint_budget(&self) -> Duration {
        self.read_timeout().saturating_mul(self.endpoint_scale)
    }

    /// Budget for waiting on `nodes` instances, never less than one node's worth
    pub fn instance_budget(&self, nodes: usize) -> Duration {
        let nodes = u32::try_from(nodes.max(1)).unwrap_or(u32::MAX);
        self.read_timeout()
            .saturating_mul(self.per_node_scale)
            .saturating_mul(nodes)
    }

    /// Budget for waiting on one add-on
    pub fn addon_budget(&self) -> Duration {
        self.read_timeout().saturating_mul(self.addon_scale)
    }

    /// Budget for waiting on a node pool or serverless pool
    pub fn pool_budget(&self) -> Duration {
        self.write_timeout()
    }

    /// Grace period for "not found" right after a create
    pub fn not_found_grace(&self) -> Duration {
        Duration::from_secs(self.not_found_grace_secs)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::config(format!("{} must be a number of seconds: {}", key, e))),
    }
}
