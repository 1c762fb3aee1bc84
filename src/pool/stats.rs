//! Pool statistics
//!
//! Counters are updated with relaxed atomics and only read for logging.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Statistics for the connection pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Total connections opened through the connector
    pub total_created: AtomicUsize,
    /// Connections currently parked
    pub idle_count: AtomicUsize,
    /// Connections currently checked out
    pub in_use_count: AtomicUsize,
    /// Checkouts served from the idle set
    pub total_reused: AtomicUsize,
    /// Connections returned to the idle set
    pub total_released: AtomicUsize,
    /// Idle connections closed for age, liveness or eviction
    pub total_expired: AtomicUsize,
    /// Acquisitions that gave up waiting for a slot
    pub total_exhausted: AtomicUsize,
}

impl PoolStats {
    /// Create new pool stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection opened
    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a checkout
    pub fn record_checkout(&self, reused: bool) {
        if reused {
            self.total_reused.fetch_add(1, Ordering::Relaxed);
        }
        self.in_use_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a checkout
    pub fn record_checkin(&self) {
        self.in_use_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection parked for reuse
    pub fn record_released(&self) {
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record idle connections closed
    pub fn record_expired(&self, count: usize) {
        self.total_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Record an acquisition timeout
    pub fn record_exhausted(&self) {
        self.total_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Update idle count
    pub fn set_idle_count(&self, count: usize) {
        self.idle_count.store(count, Ordering::Relaxed);
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            total_created: self.total_created.load(Ordering::Relaxed),
            idle_count: self.idle_count.load(Ordering::Relaxed),
            in_use_count: self.in_use_count.load(Ordering::Relaxed),
            total_reused: self.total_reused.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
            total_exhausted: self.total_exhausted.load(Ordering::Relaxed),
        }
    }

    /// Log pool health status
    pub fn log_health(&self) {
        let stats = self.snapshot();
        debug!(
            "Pool health: created={}, idle={}, in_use={}, reused={}, released={}, expired={}, exhausted={}",
            stats.total_created,
            stats.idle_count,
            stats.in_use_count,
            stats.total_reused,
            stats.total_released,
            stats.total_expired,
            stats.total_exhausted
        );
    }
}

/// Snapshot of pool statistics
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub total_created: usize,
    pub idle_count: usize,
    pub in_use_count: usize,
    pub total_reused: usize,
    pub total_released: usize,
    pub total_expired: usize,
    pub total_exhausted: usize,
}
