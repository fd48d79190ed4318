//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! CONNECT dial to origin:
//!     → retries.rs (attempt budget, fixed delay, retry events)
//!     → timeouts.rs (bound each connect attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every dial has a deadline
//! - Retries apply to the tunnel dial only
//! - No retries once bytes have been exchanged

pub mod retries;
pub mod timeouts;

pub use retries::{dial_with_retry, retry_with_delay, RetryPolicy};
pub use timeouts::connect_with_timeout;
