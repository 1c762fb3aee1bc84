//! # Kneesocks - HTTP(S) forward proxy over SOCKS5
//!
//! Kneesocks accepts plain HTTP proxy requests and `CONNECT` tunnels on a
//! local port and relays every byte through an upstream SOCKS5 proxy. It is
//! useful for programs that speak HTTP proxy but not SOCKS.
//!
//! ## Features
//!
//! - **HTTP forwarding**: absolute-form requests are relayed with headers and
//!   bodies untouched, including chunked bodies
//! - **CONNECT tunnels**: opaque byte splicing for HTTPS and anything else
//! - **Connection pooling**: bounded, per-target reuse of upstream connections
//! - **Keep-alive**: client connections carry several requests when possible
//! - **SOCKS5 authentication**: optional username/password
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kneesocks::config::load_config;
//! use kneesocks::ProxyServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("kneesocks.toml")?;
//!     let server = ProxyServer::from_config(config);
//!
//!     let addr = server.start().await?;
//!     println!("listening on {}", addr);
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! HTTP client -> Kneesocks -> SOCKS5 proxy -> Origin
//! ```
//!
//! The server spawns one task per client connection. Plain requests go
//! through the pooled client; `CONNECT` requests get a dedicated upstream
//! stream that is spliced with the client.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod http;
pub mod pool;
pub mod relay;
pub mod server;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, ProxyConfig};
pub use error::{GatewayStatus, ProxyError};
pub use server::ProxyServer;

/// Version of the Kneesocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
