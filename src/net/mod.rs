//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, per-IP admission)
//!     → connection.rs (lifecycle tracking, drain state)
//!     → Hand off to HTTP layer
//!
//! CONNECT tunnel
//!     → buffer.rs (relay buffers on loan for the tunnel's lifetime)
//!
//! Drain States:
//!     Running → Draining → ForceClose
//! ```
//!
//! # Design Decisions
//! - Over-limit clients get a 429 and are closed before any parsing
//! - Each connection and tunnel is tracked for graceful shutdown

pub mod buffer;
pub mod connection;
pub mod listener;

pub use buffer::{BufferPool, PooledBuffer};
pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, DrainState};
pub use listener::{Admission, Listener, ListenerError};
