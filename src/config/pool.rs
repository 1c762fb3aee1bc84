//! Connection pool configuration
//!
//! Defines configuration for the upstream HTTP connection pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum outstanding upstream connections
fn default_max_connections() -> usize {
    20
}

/// Default idle timeout in seconds
fn default_idle_timeout() -> u64 {
    90
}

/// Default acquire timeout in seconds
fn default_acquire_timeout() -> u64 {
    10
}

/// Default prune interval in seconds
fn default_prune_interval() -> u64 {
    30
}

/// Connection pool configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of outstanding connections (idle + in use, all targets)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle connections older than this many seconds are closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum time to wait for a pool slot
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// How often idle connections are pruned
    #[serde(default = "default_prune_interval")]
    pub prune_interval: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            acquire_timeout: default_acquire_timeout(),
            prune_interval: default_prune_interval(),
        }
    }
}

impl PoolConfig {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Acquire timeout as a duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    /// Prune interval as a duration
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval)
    }

    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.prune_interval == 0 {
            return Err("prune_interval must be greater than 0".to_string());
        }
        Ok(())
    }
}
