//! Transport module for Kneesocks
//!
//! This module provides the upstream connector abstraction: anything that can
//! open a raw byte stream to an [`UpstreamTarget`]. The production
//! implementation tunnels through a SOCKS5 endpoint.

mod resolver;
mod socks;
mod target;

pub use resolver::{build_resolver, CachingResolver, Resolver, SystemResolver};
pub use socks::SocksConnector;
pub use target::UpstreamTarget;

use crate::config::TcpConfig;
use crate::error::ProxyError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Opens raw streams to upstream targets
///
/// Each call allocates one fresh connection; the caller owns the returned
/// stream and closes it by dropping it.
#[async_trait]
pub trait Connector: Debug + Send + Sync + 'static {
    /// The stream type produced by this connector
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug + 'static;

    /// Open a stream to `target`
    async fn connect(&self, target: &UpstreamTarget) -> Result<Self::Stream, ProxyError>;
}
