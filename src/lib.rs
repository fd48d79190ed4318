//! HTTP/1.1 forward proxy library.
//!
//! Plain HTTP requests are forwarded to the origin named in their absolute URI;
//! CONNECT requests become byte-for-byte TCP tunnels.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::{ProxyHandler, ProxyServer};
pub use lifecycle::Shutdown;
pub use observability::sink::ObservabilitySink;
