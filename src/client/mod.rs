//! Client module for Kneesocks
//!
//! This module contains the pooled HTTP/1 client used to forward plain
//! proxy requests to origin servers.

#[allow(clippy::module_inception)]
mod client;
mod request;

pub use client::{PendingRequest, PooledHttpClient, UpstreamResponse};
pub use request::{OutboundRequest, HTTP_DEFAULT_PORT};
