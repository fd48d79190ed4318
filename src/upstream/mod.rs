//! Upstream client subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP forward:
//!     → pool.rs (acquire a PooledClient; never blocks)
//!         → client connection cache (per-host idle connections, 5 min expiry)
//!         → dns.rs (shared resolver cache, 1 h TTL)
//!     → request sent, response collected
//!     → PooledClient dropped → returned to the pool
//! ```
//!
//! # Design Decisions
//! - The pool is a resource manager only; it knows nothing about methods or tunnels
//! - Clients are generic, not keyed per origin

pub mod dns;
pub mod pool;

pub use dns::CachingResolver;
pub use pool::{ClientPool, ClientSettings, PooledClient, UpstreamClient};
