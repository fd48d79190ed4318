//! Caching DNS resolver for upstream clients.
//!
//! # Responsibilities
//! - Resolve origin host names for the HTTP connector
//! - Cache answers for a fixed TTL
//! - Bound the number of resolutions in flight
//!
//! # Design Decisions
//! - Shared by every pooled client, so one lookup serves all of them
//! - Cache is a `DashMap`; expired entries are refreshed on demand and swept
//!   whenever a fresh answer is stored
//! - Lookups go through Tokio's blocking resolver behind a semaphore

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hyper_util::client::legacy::connect::dns::Name;
use tokio::sync::Semaphore;
use tower::Service;

/// How long a successful answer is reused.
pub const DNS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on concurrent lookups.
pub const MAX_CONCURRENT_RESOLUTIONS: usize = 4096;

#[derive(Debug, Clone)]
struct CachedAnswer {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

#[derive(Debug)]
struct ResolverInner {
    cache: DashMap<String, CachedAnswer>,
    ttl: Duration,
    in_flight: Semaphore,
}

/// DNS resolver with a TTL cache, usable as an `HttpConnector` resolver.
#[derive(Debug, Clone)]
pub struct CachingResolver {
    inner: Arc<ResolverInner>,
}

impl CachingResolver {
    pub fn new() -> Self {
        Self::with_settings(DNS_CACHE_TTL, MAX_CONCURRENT_RESOLUTIONS)
    }

    pub fn with_settings(ttl: Duration, max_in_flight: usize) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                cache: DashMap::new(),
                ttl,
                in_flight: Semaphore::new(max_in_flight.max(1)),
            }),
        }
    }

    /// Resolve `host`, serving from cache while the entry is fresh.
    ///
    /// Returned addresses carry port 0; the connector fills in the port.
    pub async fn resolve(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = self.lookup_cached(host) {
            return Ok(addrs);
        }

        let _permit = self
            .inner
            .in_flight
            .acquire()
            .await
            .map_err(|_| io::Error::other("resolver closed"))?;

        // Another task may have filled the entry while we waited.
        if let Some(addrs) = self.lookup_cached(host) {
            return Ok(addrs);
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {host}"),
            ));
        }

        tracing::trace!(host, count = addrs.len(), "Resolved origin host");
        self.evict_expired();
        self.inner.cache.insert(
            host.to_string(),
            CachedAnswer {
                addrs: addrs.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(addrs)
    }

    fn lookup_cached(&self, host: &str) -> Option<Vec<SocketAddr>> {
        let entry = self.inner.cache.get(host)?;
        if entry.resolved_at.elapsed() < self.inner.ttl {
            Some(entry.addrs.clone())
        } else {
            None
        }
    }

    fn evict_expired(&self) {
        let ttl = self.inner.ttl;
        self.inner
            .cache
            .retain(|_, answer| answer.resolved_at.elapsed() < ttl);
    }

    /// Number of cached hosts, fresh or stale.
    pub fn cached_hosts(&self) -> usize {
        self.inner.cache.len()
    }
}

impl Default for CachingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Name> for CachingResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let resolver = self.clone();
        Box::pin(async move { resolver.resolve(name.as_str()).await.map(Vec::into_iter) })
    }
}
