//! Error types for Kneesocks
//!
//! This module defines the error taxonomy shared by the connector, the pooled
//! client and the relays, together with the gateway status each error maps to.

use std::io;
use thiserror::Error;

/// Main error type for proxy operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The SOCKS endpoint could not be reached (resolution, connect, timeout)
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The SOCKS endpoint rejected our authentication
    #[error("Upstream authentication rejected: {0}")]
    UpstreamAuthRejected(String),

    /// The SOCKS endpoint refused to connect to the target
    #[error("Upstream refused: {0}")]
    UpstreamRefused(String),

    /// IO failure on an established upstream connection
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(#[source] io::Error),

    /// The origin sent something that is not valid HTTP/1
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// Malformed inbound request or CONNECT line
    #[error("Client protocol error: {0}")]
    ClientProtocol(String),

    /// IO failure on the client-facing socket
    #[error("Client IO error: {0}")]
    ClientIo(#[source] io::Error),

    /// No pool slot became free within the acquire timeout
    #[error("Connection pool exhausted after waiting {0:?}")]
    PoolExhausted(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Gateway status sent to a client when a request fails before any
/// response bytes were written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStatus {
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub reason: &'static str,
}

impl GatewayStatus {
    /// 400 Bad Request
    pub const BAD_REQUEST: GatewayStatus = GatewayStatus {
        code: 400,
        reason: "Bad Request",
    };
    /// 502 Bad Gateway
    pub const BAD_GATEWAY: GatewayStatus = GatewayStatus {
        code: 502,
        reason: "Bad Gateway",
    };
    /// 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: GatewayStatus = GatewayStatus {
        code: 503,
        reason: "Service Unavailable",
    };
}

impl ProxyError {
    /// Status to answer the client with, if the client can still be answered
    pub fn status(&self) -> Option<GatewayStatus> {
        match self {
            ProxyError::ClientProtocol(_) => Some(GatewayStatus::BAD_REQUEST),
            ProxyError::PoolExhausted(_) => Some(GatewayStatus::SERVICE_UNAVAILABLE),
            ProxyError::ClientIo(_) => None,
            ProxyError::UpstreamUnreachable(_)
            | ProxyError::UpstreamAuthRejected(_)
            | ProxyError::UpstreamRefused(_)
            | ProxyError::UpstreamTransport(_)
            | ProxyError::UpstreamProtocol(_)
            | ProxyError::Config(_)
            | ProxyError::Io(_) => Some(GatewayStatus::BAD_GATEWAY),
        }
    }

    /// Whether the error originated on the upstream side
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamUnreachable(_)
                | ProxyError::UpstreamAuthRejected(_)
                | ProxyError::UpstreamRefused(_)
                | ProxyError::UpstreamTransport(_)
                | ProxyError::UpstreamProtocol(_)
        )
    }

    /// Map an upstream IO error, treating timeouts and premature EOF as
    /// transport failures
    pub fn upstream_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData => ProxyError::UpstreamProtocol(err.to_string()),
            _ => ProxyError::UpstreamTransport(err),
        }
    }
}

/// Convenience result alias
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
