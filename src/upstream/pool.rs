//! Upstream client pool.
//!
//! # Responsibilities
//! - Hand out configured HTTP clients without blocking
//! - Take clients back for reuse; never close them on release
//! - Keep one shared DNS cache behind every client
//!
//! # Design Decisions
//! - Free-list split into shards picked round-robin; `acquire` only ever
//!   `try_lock`s, so a contended shard is skipped rather than waited on
//! - An empty or contended pool constructs a new client on demand
//! - Checked-out clients are owned by an RAII guard, so no two requests can
//!   hold the same instance at once

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::upstream::dns::CachingResolver;

/// Idle upstream connections are closed after this long.
pub const IDLE_CONNECTION_TTL: Duration = Duration::from_secs(5 * 60);

/// HTTP client type handed out by the pool.
pub type UpstreamClient = Client<HttpConnector<CachingResolver>, Full<Bytes>>;

/// Settings applied to every client the pool constructs.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Idle connections kept per origin host.
    pub max_connections_per_host: usize,
    pub dial_timeout: Duration,
    pub idle_timeout: Duration,
}

struct PoolEntry {
    id: u64,
    client: UpstreamClient,
}

/// Sharded free-list of upstream clients.
pub struct ClientPool {
    shards: Box<[Mutex<Vec<PoolEntry>>]>,
    next_shard: AtomicUsize,
    next_id: AtomicU64,
    settings: ClientSettings,
    resolver: CachingResolver,
}

impl ClientPool {
    pub fn new(settings: ClientSettings) -> Self {
        let shard_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .next_power_of_two();
        Self::with_shards(settings, shard_count)
    }

    pub fn with_shards(settings: ClientSettings, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            next_shard: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            settings,
            resolver: CachingResolver::new(),
        }
    }

    /// Take an idle client or build a new one. Never waits on a lock.
    pub fn acquire(self: &Arc<Self>) -> PooledClient {
        let start = self.next_shard.fetch_add(1, Ordering::Relaxed);
        let len = self.shards.len();

        for i in 0..len {
            let shard = &self.shards[(start + i) % len];
            if let Ok(mut free) = shard.try_lock() {
                if let Some(entry) = free.pop() {
                    return self.guard(entry);
                }
            }
        }

        let entry = PoolEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            client: self.build_client(),
        };
        tracing::debug!(client_id = entry.id, "Constructed upstream client");
        self.guard(entry)
    }

    fn guard(self: &Arc<Self>, entry: PoolEntry) -> PooledClient {
        PooledClient {
            entry: Some(entry),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, entry: PoolEntry) {
        let start = self.next_shard.fetch_add(1, Ordering::Relaxed);
        let len = self.shards.len();

        for i in 0..len {
            if let Ok(mut free) = self.shards[(start + i) % len].try_lock() {
                free.push(entry);
                return;
            }
        }

        // Every shard busy: wait on one rather than drop a warm client.
        self.shards[start % len]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn build_client(&self) -> UpstreamClient {
        let mut connector = HttpConnector::new_with_resolver(self.resolver.clone());
        connector.set_connect_timeout(Some(self.settings.dial_timeout));
        connector.set_nodelay(true);
        connector.enforce_http(true);

        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.settings.idle_timeout)
            .pool_max_idle_per_host(self.settings.max_connections_per_host)
            .pool_timer(TokioTimer::new())
            .http1_preserve_header_case(true)
            .build(connector)
    }

    /// Clients currently sitting in the free-list.
    pub fn idle_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Clients constructed over the pool's lifetime.
    pub fn created_count(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    pub fn resolver(&self) -> &CachingResolver {
        &self.resolver
    }
}

/// A client checked out of the pool; returned to it on drop.
pub struct PooledClient {
    entry: Option<PoolEntry>,
    pool: Arc<ClientPool>,
}

impl PooledClient {
    /// Identity of the underlying instance.
    pub fn id(&self) -> u64 {
        self.entry.as_ref().map(|e| e.id).unwrap_or_default()
    }
}

impl Deref for PooledClient {
    type Target = UpstreamClient;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the entry.
        match &self.entry {
            Some(entry) => &entry.client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release(entry);
        }
    }
}
