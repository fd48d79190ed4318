//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine (forward / tunnel / server):
//!     → sink.rs (ObservabilitySink trait, injected at construction)
//!         → metrics.rs (PrometheusSink → /metrics endpoint)
//!         → MemorySink / NoopSink
//!     → logging.rs (structured log events via tracing)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the request span
//! - Metrics are cheap (atomic increments)
//! - Observability is never consulted for control decisions

pub mod logging;
pub mod metrics;
pub mod sink;

pub use sink::{
    ByteDirection, ConnectionGauge, ErrorKind, Event, MemorySink, NoopSink, ObservabilitySink,
    TrafficKind, TunnelGauge,
};
