//! SOCKS5 upstream connector
//!
//! Opens a TCP connection to the configured SOCKS endpoint and performs the
//! SOCKS5 CONNECT handshake for the requested target.

use super::{Connector, Resolver, SocketOpts, UpstreamTarget};
use crate::config::{AuthMode, UpstreamConfig};
use crate::error::ProxyError;
use async_socks5::{AddrKind, Auth};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Connector that tunnels every connection through a SOCKS5 endpoint
#[derive(Debug, Clone)]
pub struct SocksConnector {
    /// SOCKS endpoint host
    host: String,
    /// SOCKS endpoint port
    port: u16,
    /// Credentials presented to the endpoint
    auth: AuthMode,
    /// Resolver for the endpoint host
    resolver: Arc<dyn Resolver>,
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Bound on reaching the endpoint and on the handshake
    connect_timeout: Duration,
}

impl SocksConnector {
    /// Create a connector from the upstream configuration
    pub fn new(config: &UpstreamConfig, resolver: Arc<dyn Resolver>) -> Self {
        SocksConnector {
            host: config.host.clone(),
            port: config.port,
            auth: config.auth.clone(),
            resolver,
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address of the SOCKS endpoint as configured
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the raw TCP connection to the SOCKS endpoint
    async fn open_endpoint(&self) -> Result<TcpStream, ProxyError> {
        let resolved = self
            .resolver
            .resolve(&self.host, self.port)
            .await
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!(
                    "failed to resolve {}: {}",
                    self.endpoint(),
                    e
                ))
            })?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| {
                ProxyError::UpstreamUnreachable(format!(
                    "connection timeout to {}",
                    self.endpoint()
                ))
            })?
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!(
                    "failed to connect to {}: {}",
                    self.endpoint(),
                    e
                ))
            })?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            warn!("Failed to apply socket options: {}", e);
        }

        Ok(stream)
    }

    fn credentials(&self) -> Option<Auth> {
        match &self.auth {
            AuthMode::None => None,
            AuthMode::UserPass { username, password } => {
                Some(Auth::new(username.clone(), password.clone()))
            }
        }
    }
}

#[async_trait]
impl Connector for SocksConnector {
    type Stream = TcpStream;

    async fn connect(&self, target: &UpstreamTarget) -> Result<Self::Stream, ProxyError> {
        let mut stream = self.open_endpoint().await?;

        let handshake = async_socks5::connect(&mut stream, socks_addr(target), self.credentials());
        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(map_handshake_error(e, target)),
            Err(_) => {
                return Err(ProxyError::UpstreamUnreachable(format!(
                    "SOCKS handshake timeout for {}",
                    target
                )))
            }
        }

        debug!("SOCKS tunnel to {} open via {}", target, self.endpoint());
        Ok(stream)
    }
}

/// SOCKS address for a target; hostnames are resolved by the SOCKS server
fn socks_addr(target: &UpstreamTarget) -> AddrKind {
    match target.ip() {
        Some(ip) => AddrKind::Ip(SocketAddr::new(ip, target.port())),
        None => AddrKind::Domain(target.host().to_string(), target.port()),
    }
}

/// Classify a failed handshake
fn map_handshake_error(err: async_socks5::Error, target: &UpstreamTarget) -> ProxyError {
    match err {
        async_socks5::Error::NoAcceptableMethods => ProxyError::UpstreamAuthRejected(format!(
            "no acceptable authentication method for {}",
            target
        )),
        async_socks5::Error::InvalidAuthMethod(method) => ProxyError::UpstreamAuthRejected(
            format!("endpoint selected unusable auth method {:?}", method),
        ),
        async_socks5::Error::InvalidAuthStatus(status) => ProxyError::UpstreamAuthRejected(
            format!("authentication failed with status {:#04x}", status),
        ),
        async_socks5::Error::Response(reply) => {
            ProxyError::UpstreamRefused(format!("{:?} for {}", reply, target))
        }
        async_socks5::Error::Io(e) => ProxyError::UpstreamUnreachable(format!(
            "SOCKS handshake for {} failed: {}",
            target, e
        )),
        other => ProxyError::UpstreamUnreachable(format!(
            "SOCKS handshake for {} failed: {}",
            target, other
        )),
    }
}
