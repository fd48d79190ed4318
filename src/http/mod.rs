//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection
//!     → server.rs (hyper http1, per-IP admission, drain)
//!     → handler.rs (request span, classify)
//!         CONNECT → tunnel.rs (dial with retry, 200, bidirectional relay)
//!         other   → request.rs (target, body limits)
//!                 → forward.rs (hop-by-hop, X-Forwarded-For, pooled client)
//!                 → response.rs (sanitized origin response or diagnostic)
//!     → Send to client
//! ```

pub mod forward;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;

pub use forward::{prepare_outbound, OutboundRequest};
pub use handler::{HandlerSettings, ProxyHandler};
pub use request::{BodyLimits, HeaderList, InboundRequest};
pub use response::{OutboundResponse, ProxyBody};
pub use server::{ProxyServer, ServerSettings};
pub use tunnel::{TunnelSession, TunnelTotals};
