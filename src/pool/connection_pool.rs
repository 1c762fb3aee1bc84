//! Bounded connection pool keyed by upstream target
//!
//! Every outstanding connection, idle or in use and for any target, holds a
//! permit of one semaphore sized `max_connections`. When the bound is
//! reached an idle connection to another target is evicted if one exists;
//! otherwise the caller waits up to `acquire_timeout` for a slot.

use super::guard::PooledConnection;
use super::idle::IdleConnection;
use super::stats::PoolStats;
use crate::config::PoolConfig;
use crate::error::ProxyError;
use crate::transport::{Connector, UpstreamTarget};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

type IdleSet<S> = HashMap<UpstreamTarget, VecDeque<IdleConnection<S>>>;

/// Connection pool over a [`Connector`]
pub struct ConnectionPool<C: Connector> {
    /// Pool configuration
    config: PoolConfig,
    /// Connector for new connections
    connector: Arc<C>,
    /// One permit per outstanding connection
    permits: Arc<Semaphore>,
    /// Parked connections per target, oldest first
    idle: Mutex<IdleSet<C::Stream>>,
    /// Notification when a connection is parked
    parked: Notify,
    /// Statistics
    stats: Arc<PoolStats>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a new pool
    pub fn new(config: PoolConfig, connector: Arc<C>) -> Arc<Self> {
        Arc::new(ConnectionPool {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            connector,
            idle: Mutex::new(HashMap::new()),
            parked: Notify::new(),
            stats: Arc::new(PoolStats::new()),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connector used for new connections
    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Get pool statistics
    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    /// Number of slots not held by any connection
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of parked connections across all targets
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.values().map(VecDeque::len).sum()
    }

    /// Check out a connection to `target`
    ///
    /// Reuses the most recently parked live connection to the same target,
    /// otherwise opens a new one once a slot is free.
    pub async fn acquire(
        self: &Arc<Self>,
        target: &UpstreamTarget,
    ) -> Result<PooledConnection<C>, ProxyError> {
        let deadline = Instant::now() + self.config.acquire_timeout();

        loop {
            // Register before looking so a park in between is not missed
            let parked = self.parked.notified();
            tokio::pin!(parked);
            parked.as_mut().enable();

            if let Some(idle) = self.take_idle(target).await {
                let (stream, permit, created_at) = idle.into_parts();
                trace!("Reusing idle connection to {}", target);
                return Ok(PooledConnection::new(
                    stream,
                    permit,
                    target.clone(),
                    created_at,
                    true,
                    self.clone(),
                ));
            }

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::Closed) => return Err(self.exhausted()),
                Err(TryAcquireError::NoPermits) => {
                    if self.evict_other(target).await {
                        continue;
                    }

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.exhausted());
                    }

                    tokio::select! {
                        res = self.permits.clone().acquire_owned() => match res {
                            Ok(permit) => permit,
                            Err(_) => return Err(self.exhausted()),
                        },
                        _ = &mut parked => continue,
                        _ = tokio::time::sleep(remaining) => return Err(self.exhausted()),
                    }
                }
            };

            return self.open(target, permit).await;
        }
    }

    /// Open a new connection in an acquired slot
    async fn open(
        self: &Arc<Self>,
        target: &UpstreamTarget,
        permit: OwnedSemaphorePermit,
    ) -> Result<PooledConnection<C>, ProxyError> {
        let stream = self.connector.connect(target).await?;
        self.stats.record_created();
        debug!("Opened pooled connection to {}", target);
        Ok(PooledConnection::new(
            stream,
            permit,
            target.clone(),
            Instant::now(),
            false,
            self.clone(),
        ))
    }

    fn exhausted(&self) -> ProxyError {
        self.stats.record_exhausted();
        ProxyError::PoolExhausted(self.config.acquire_timeout())
    }

    /// Pop the most recent usable idle connection to `target`
    async fn take_idle(&self, target: &UpstreamTarget) -> Option<IdleConnection<C::Stream>> {
        let idle_timeout = self.config.idle_timeout();
        let mut idle = self.idle.lock().await;
        let queue = idle.get_mut(target)?;

        let mut found = None;
        let mut discarded = 0;
        while let Some(mut conn) = queue.pop_back() {
            if conn.is_stale(idle_timeout) || !conn.is_alive() {
                discarded += 1;
                continue;
            }
            found = Some(conn);
            break;
        }

        if queue.is_empty() {
            idle.remove(target);
        }
        if discarded > 0 {
            debug!("Discarded {} dead idle connections to {}", discarded, target);
            self.stats.record_expired(discarded);
        }
        self.stats.set_idle_count(idle.values().map(VecDeque::len).sum());
        found
    }

    /// Close the longest-idle connection to any target other than `target`
    async fn evict_other(&self, target: &UpstreamTarget) -> bool {
        let mut idle = self.idle.lock().await;
        let victim = idle
            .iter()
            .filter(|(key, _)| *key != target)
            .filter_map(|(key, queue)| queue.front().map(|conn| (key, conn.idle_since)))
            .min_by_key(|(_, idle_since)| *idle_since)
            .map(|(key, _)| key.clone());

        let Some(victim) = victim else {
            return false;
        };

        if let Some(queue) = idle.get_mut(&victim) {
            queue.pop_front();
            if queue.is_empty() {
                idle.remove(&victim);
            }
        }
        debug!("Evicted idle connection to {} to make room for {}", victim, target);
        self.stats.record_expired(1);
        self.stats.set_idle_count(idle.values().map(VecDeque::len).sum());
        true
    }

    /// Park a connection for reuse
    pub(crate) async fn park(
        &self,
        target: UpstreamTarget,
        stream: C::Stream,
        permit: OwnedSemaphorePermit,
        created_at: Instant,
    ) {
        let mut idle = self.idle.lock().await;
        trace!("Parking connection to {}", target);
        idle.entry(target)
            .or_default()
            .push_back(IdleConnection::new(stream, permit, created_at));
        self.stats.record_released();
        self.stats.set_idle_count(idle.values().map(VecDeque::len).sum());
        drop(idle);

        self.parked.notify_waiters();
    }

    /// Close idle connections that are too old or no longer usable
    ///
    /// Returns the number of connections closed.
    pub async fn prune(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut idle = self.idle.lock().await;

        let mut removed = 0;
        idle.retain(|_, queue| {
            let before = queue.len();
            queue.retain_mut(|conn| !conn.is_stale(idle_timeout) && conn.is_alive());
            removed += before - queue.len();
            !queue.is_empty()
        });

        if removed > 0 {
            debug!("Pruned {} idle connections", removed);
            self.stats.record_expired(removed);
        }
        self.stats.set_idle_count(idle.values().map(VecDeque::len).sum());
        removed
    }

    /// Close every idle connection
    pub async fn clear(&self) {
        let mut idle = self.idle.lock().await;
        let count: usize = idle.values().map(VecDeque::len).sum();
        idle.clear();
        self.stats.set_idle_count(0);
        if count > 0 {
            debug!("Closed {} idle connections", count);
        }
    }

    /// Spawn the periodic prune task; it stops on the shutdown signal
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pool = self.clone();
        let interval = self.config.prune_interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Pool maintenance shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        pool.prune().await;
                        pool.stats.log_health();
                    }
                }
            }
            pool.clear().await;
        })
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("connector", &self.connector)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}
