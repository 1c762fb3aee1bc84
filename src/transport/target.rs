//! Upstream target addresses
//!
//! An [`UpstreamTarget`] names an origin server and doubles as the pool key.

use crate::error::ProxyError;
use std::fmt;
use std::net::IpAddr;
use url::{Host, Url};

/// Origin server identified by host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamTarget {
    /// Hostname or IP literal, without IPv6 brackets
    host: String,
    /// TCP port
    port: u16,
}

impl UpstreamTarget {
    /// Create a new target; surrounding IPv6 brackets are removed
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner.to_string(),
            None => host,
        };
        UpstreamTarget { host, port }
    }

    /// Build a target from a parsed URL, falling back to the scheme's default port
    pub fn from_url(url: &Url) -> Result<Self, ProxyError> {
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => {
                return Err(ProxyError::ClientProtocol(format!(
                    "missing host in {}",
                    url
                )))
            }
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::ClientProtocol(format!("missing port in {}", url)))?;
        Ok(UpstreamTarget { host, port })
    }

    /// Hostname or IP literal
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host as an IP address, if it is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Value for a `Host` header, omitting the port when it is the default
    pub fn host_header(&self, default_port: u16) -> String {
        let host = match self.ip() {
            Some(IpAddr::V6(_)) => format!("[{}]", self.host),
            _ => self.host.clone(),
        };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
