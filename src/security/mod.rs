//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection:
//!     → limits.rs (per-IP connection cap)
//!
//! HTTP request / response:
//!     → headers.rs (strip hop-by-hop, chain X-Forwarded-For)
//! ```
//!
//! # Design Decisions
//! - Fail closed: connections over the cap are refused before any parsing
//! - Header hygiene runs on both directions, every time

pub mod headers;
pub mod limits;

pub use headers::{append_forwarded_for, strip_hop_by_hop};
pub use limits::{IpPermit, PerIpLimiter};
