//! Configuration module for Kneesocks
//!
//! This module provides configuration types and parsing for the proxy.

mod pool;
mod proxy;
mod transport;

pub use pool::PoolConfig;
pub use proxy::{AuthMode, DnsConfig, ProxyConfig, ServerConfig, UpstreamConfig};
pub use transport::TcpConfig;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<ProxyConfig> {
    let config: ProxyConfig =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}
