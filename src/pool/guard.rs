//! Checked-out pool connections
//!
//! A [`PooledConnection`] owns its stream and its pool slot. Dropping it
//! closes the stream and frees the slot; only [`PooledConnection::release`]
//! parks the stream for reuse.

use super::connection_pool::ConnectionPool;
use super::stats::PoolStats;
use crate::transport::{Connector, UpstreamTarget};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

/// Counts a checkout until it ends, however it ends
struct Checkout {
    stats: Arc<PoolStats>,
}

impl Checkout {
    fn new(stats: Arc<PoolStats>, reused: bool) -> Self {
        stats.record_checkout(reused);
        Checkout { stats }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.stats.record_checkin();
    }
}

/// Connection checked out of a [`ConnectionPool`] for one exchange
pub struct PooledConnection<C: Connector> {
    /// The upstream stream
    stream: C::Stream,
    /// Slot held in the pool bound
    permit: OwnedSemaphorePermit,
    /// Origin this connection leads to
    target: UpstreamTarget,
    /// When the stream was opened
    created_at: Instant,
    /// Whether this checkout reused an idle connection
    reused: bool,
    /// Pool to return to
    pool: Arc<ConnectionPool<C>>,
    _checkout: Checkout,
}

impl<C: Connector> PooledConnection<C> {
    pub(crate) fn new(
        stream: C::Stream,
        permit: OwnedSemaphorePermit,
        target: UpstreamTarget,
        created_at: Instant,
        reused: bool,
        pool: Arc<ConnectionPool<C>>,
    ) -> Self {
        let checkout = Checkout::new(pool.stats().clone(), reused);
        PooledConnection {
            stream,
            permit,
            target,
            created_at,
            reused,
            pool,
            _checkout: checkout,
        }
    }

    /// Origin this connection leads to
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Whether the connection was taken from the idle set
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Park the connection for reuse by later requests to the same target
    ///
    /// Only call this after an exchange finished cleanly with nothing left
    /// unread on the stream.
    pub async fn release(self) {
        let PooledConnection {
            stream,
            permit,
            target,
            created_at,
            pool,
            _checkout: checkout,
            ..
        } = self;
        drop(checkout);
        pool.park(target, stream, permit, created_at).await;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Stream;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("target", &self.target)
            .field("reused", &self.reused)
            .field("stream", &self.stream)
            .finish()
    }
}
