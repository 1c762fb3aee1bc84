//! Proxy configuration types
//!
//! Defines the root configuration: the public listener, the upstream SOCKS
//! endpoint, the connection pool and the DNS cache.

use super::{PoolConfig, TcpConfig};
use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listener address
fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Default HTTP listener port
fn default_http_port() -> u16 {
    10001
}

/// Default Proxy-Agent header value
fn default_proxy_agent() -> String {
    "Kneesocks".to_string()
}

/// Default maximum size of a request or response head
fn default_max_head_size() -> usize {
    64 * 1024
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProxyConfig {
    /// Public listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream SOCKS endpoint configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Connection pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// DNS cache configuration
    #[serde(default)]
    pub dns: DnsConfig,
}

impl ProxyConfig {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), ProxyError> {
        self.upstream.validate().map_err(ProxyError::Config)?;
        self.pool.validate().map_err(ProxyError::Config)?;
        if self.server.max_head_size < 1024 {
            return Err(ProxyError::Config(
                "max_head_size must be at least 1024 bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Public listener configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP proxy binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,

    /// Port the HTTP proxy binds to
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Identifier sent in the Proxy-Agent header
    #[serde(default = "default_proxy_agent")]
    pub proxy_agent: String,

    /// Largest accepted request or response head in bytes
    #[serde(default = "default_max_head_size")]
    pub max_head_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            http_port: default_http_port(),
            proxy_agent: default_proxy_agent(),
            max_head_size: default_max_head_size(),
        }
    }
}

impl ServerConfig {
    /// Socket address of the listener
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.http_port)
    }
}

/// Default SOCKS endpoint host
fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}

/// Default SOCKS endpoint port
fn default_upstream_port() -> u16 {
    10002
}

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Default idle timeout in seconds
fn default_upstream_idle_timeout() -> u64 {
    300
}

/// Authentication used towards the SOCKS endpoint
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication
    #[default]
    None,
    /// Username/password authentication
    UserPass {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

/// Upstream SOCKS endpoint configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// SOCKS endpoint host
    #[serde(default = "default_upstream_host")]
    pub host: String,

    /// SOCKS endpoint port
    #[serde(default = "default_upstream_port")]
    pub port: u16,

    /// Authentication mode
    #[serde(default)]
    pub auth: AuthMode,

    /// Timeout for reaching the endpoint and completing the handshake, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum time an upstream socket may stay silent, in seconds
    #[serde(default = "default_upstream_idle_timeout")]
    pub idle_timeout: u64,

    /// Socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            host: default_upstream_host(),
            port: default_upstream_port(),
            auth: AuthMode::default(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_upstream_idle_timeout(),
            tcp: TcpConfig::default(),
        }
    }
}

impl UpstreamConfig {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Validate the upstream configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("upstream host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("upstream port must not be 0".to_string());
        }
        if self.connect_timeout == 0 || self.idle_timeout == 0 {
            return Err("upstream timeouts must be greater than 0".to_string());
        }
        if let AuthMode::UserPass { username, password } = &self.auth {
            // RFC 1929 limits both fields to 255 bytes
            if username.is_empty() || username.len() > 255 || password.len() > 255 {
                return Err("upstream credentials must be 1-255 bytes".to_string());
            }
        }
        Ok(())
    }
}

/// Default DNS cache TTL in seconds
fn default_dns_ttl() -> u64 {
    3600
}

/// Default DNS cache capacity
fn default_dns_cache_size() -> usize {
    5000
}

/// Default DNS cache enabled state
fn default_dns_enabled() -> bool {
    true
}

/// DNS cache configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DnsConfig {
    /// Cache resolved endpoint addresses
    #[serde(default = "default_dns_enabled")]
    pub enabled: bool,

    /// Time-to-live for cached entries, in seconds
    #[serde(default = "default_dns_ttl")]
    pub ttl: u64,

    /// Maximum number of cached hosts
    #[serde(default = "default_dns_cache_size")]
    pub cache_size: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            enabled: default_dns_enabled(),
            ttl: default_dns_ttl(),
            cache_size: default_dns_cache_size(),
        }
    }
}
