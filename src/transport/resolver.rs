//! Hostname resolution with optional caching
//!
//! The SOCKS endpoint is resolved through an injected [`Resolver`] so the
//! cache policy stays out of the connector and tests can substitute a fake.

use crate::config::DnsConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

/// Resolves a host and port to a socket address
#[async_trait]
pub trait Resolver: Debug + Send + Sync + 'static {
    /// Resolve `host:port`, returning the first address found
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;
}

/// Resolver backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No addresses found for: {}", host),
                )
            })
    }
}

/// A cached resolution
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    ip: IpAddr,
    inserted_at: Instant,
}

/// Resolver that caches answers of an inner resolver for a fixed TTL
#[derive(Debug)]
pub struct CachingResolver<R> {
    /// Resolver consulted on a miss
    inner: R,
    /// How long an entry stays valid
    ttl: Duration,
    /// Maximum number of cached hosts
    capacity: usize,
    /// Cached entries keyed by hostname
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl<R: Resolver> CachingResolver<R> {
    /// Create a new caching resolver
    pub fn new(inner: R, ttl: Duration, capacity: usize) -> Self {
        CachingResolver {
            inner,
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached hosts
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every cached entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn lookup(&self, host: &str) -> Option<IpAddr> {
        let entries = self.entries.read().await;
        entries
            .get(host)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.ip)
    }

    async fn insert(&self, host: &str, ip: IpAddr) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity && !entries.contains_key(host) {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }
        if entries.len() >= self.capacity && !entries.contains_key(host) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            host.to_string(),
            CacheEntry {
                ip,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl<R: Resolver> Resolver for CachingResolver<R> {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        if let Some(ip) = self.lookup(host).await {
            trace!("DNS cache hit for {}", host);
            return Ok(SocketAddr::new(ip, port));
        }

        let resolved = self.inner.resolve(host, port).await?;
        self.insert(host, resolved.ip()).await;
        Ok(resolved)
    }
}

/// Build the resolver described by the DNS configuration
pub fn build_resolver(config: &DnsConfig) -> Arc<dyn Resolver> {
    if config.enabled {
        Arc::new(CachingResolver::new(
            SystemResolver,
            Duration::from_secs(config.ttl),
            config.cache_size,
        ))
    } else {
        Arc::new(SystemResolver)
    }
}
