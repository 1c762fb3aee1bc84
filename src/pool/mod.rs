//! Connection pool module for Kneesocks
//!
//! This module bounds and reuses upstream connections opened through a
//! [`Connector`](crate::transport::Connector), keyed by origin target.

mod connection_pool;
mod guard;
mod idle;
mod stats;

pub use connection_pool::ConnectionPool;
pub use guard::PooledConnection;
pub use idle::IdleConnection;
pub use stats::{PoolStats, PoolStatsSnapshot};
