//! Observability sink interface.
//!
//! # Responsibilities
//! - Define the fire-and-forget events the engine emits
//! - Provide a recording sink for inspection and a discarding sink
//!
//! # Design Decisions
//! - The engine holds an `Arc<dyn ObservabilitySink>` passed in at construction;
//!   there is no process-wide registry
//! - Sinks never influence forwarding decisions and never fail
//! - Gauges are paired through RAII guards so every increment is matched

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which path a request or byte count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficKind {
    Http,
    Tunnel,
}

impl TrafficKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficKind::Http => "http",
            TrafficKind::Tunnel => "tunnel",
        }
    }
}

/// Error category reported alongside a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Http,
    Tunnel,
    /// A failed dial attempt that will be retried.
    Retry,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "http",
            ErrorKind::Tunnel => "tunnel",
            ErrorKind::Retry => "retry",
        }
    }
}

impl From<TrafficKind> for ErrorKind {
    fn from(kind: TrafficKind) -> Self {
        match kind {
            TrafficKind::Http => ErrorKind::Http,
            TrafficKind::Tunnel => ErrorKind::Tunnel,
        }
    }
}

/// Direction of a byte count, relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteDirection {
    /// Bytes delivered to the client (response body, origin→client).
    Sent,
    /// Bytes received from the client (request body, client→origin).
    Received,
}

/// Receiver of engine events.
pub trait ObservabilitySink: Send + Sync {
    /// A request or tunnel finished. `status` is the numeric status as a string.
    fn record_request(&self, method: &str, status: &str, kind: TrafficKind, duration: Duration);

    fn record_bytes(&self, direction: ByteDirection, kind: TrafficKind, bytes: u64);

    fn record_error(&self, kind: ErrorKind, reason: &str);

    fn connection_opened(&self);

    fn connection_closed(&self);

    fn tunnel_opened(&self);

    fn tunnel_closed(&self);
}

/// Keeps the live-connection gauge raised while held.
pub struct ConnectionGauge {
    sink: Arc<dyn ObservabilitySink>,
}

impl ConnectionGauge {
    pub fn new(sink: Arc<dyn ObservabilitySink>) -> Self {
        sink.connection_opened();
        Self { sink }
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        self.sink.connection_closed();
    }
}

/// Keeps the live-tunnel gauge raised while held.
pub struct TunnelGauge {
    sink: Arc<dyn ObservabilitySink>,
}

impl TunnelGauge {
    pub fn new(sink: Arc<dyn ObservabilitySink>) -> Self {
        sink.tunnel_opened();
        Self { sink }
    }
}

impl Drop for TunnelGauge {
    fn drop(&mut self) {
        self.sink.tunnel_closed();
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn record_request(&self, _: &str, _: &str, _: TrafficKind, _: Duration) {}
    fn record_bytes(&self, _: ByteDirection, _: TrafficKind, _: u64) {}
    fn record_error(&self, _: ErrorKind, _: &str) {}
    fn connection_opened(&self) {}
    fn connection_closed(&self) {}
    fn tunnel_opened(&self) {}
    fn tunnel_closed(&self) {}
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Request {
        method: String,
        status: String,
        kind: TrafficKind,
        duration: Duration,
    },
    Bytes {
        direction: ByteDirection,
        kind: TrafficKind,
        bytes: u64,
    },
    Error {
        kind: ErrorKind,
        reason: String,
    },
    ConnectionOpened,
    ConnectionClosed,
    TunnelOpened,
    TunnelClosed,
}

/// Records every event in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: Event) {
        self.lock().push(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Completed requests as `(method, status, kind)`.
    pub fn requests(&self) -> Vec<(String, String, TrafficKind)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Request {
                    method,
                    status,
                    kind,
                    ..
                } => Some((method.clone(), status.clone(), *kind)),
                _ => None,
            })
            .collect()
    }

    /// Errors as `(kind, reason)`.
    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Error { kind, reason } => Some((*kind, reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sum of byte events for a direction and kind.
    pub fn bytes(&self, direction: ByteDirection, kind: TrafficKind) -> u64 {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Bytes {
                    direction: d,
                    kind: k,
                    bytes,
                } if *d == direction && *k == kind => Some(*bytes),
                _ => None,
            })
            .sum()
    }

    /// Current value of the live-connection gauge.
    pub fn live_connections(&self) -> i64 {
        self.gauge(Event::ConnectionOpened, Event::ConnectionClosed)
    }

    /// Current value of the live-tunnel gauge.
    pub fn live_tunnels(&self) -> i64 {
        self.gauge(Event::TunnelOpened, Event::TunnelClosed)
    }

    fn gauge(&self, up: Event, down: Event) -> i64 {
        self.lock().iter().fold(0, |level, e| {
            if *e == up {
                level + 1
            } else if *e == down {
                level - 1
            } else {
                level
            }
        })
    }
}

impl ObservabilitySink for MemorySink {
    fn record_request(&self, method: &str, status: &str, kind: TrafficKind, duration: Duration) {
        self.push(Event::Request {
            method: method.to_string(),
            status: status.to_string(),
            kind,
            duration,
        });
    }

    fn record_bytes(&self, direction: ByteDirection, kind: TrafficKind, bytes: u64) {
        self.push(Event::Bytes {
            direction,
            kind,
            bytes,
        });
    }

    fn record_error(&self, kind: ErrorKind, reason: &str) {
        self.push(Event::Error {
            kind,
            reason: reason.to_string(),
        });
    }

    fn connection_opened(&self) {
        self.push(Event::ConnectionOpened);
    }

    fn connection_closed(&self) {
        self.push(Event::ConnectionClosed);
    }

    fn tunnel_opened(&self) {
        self.push(Event::TunnelOpened);
    }

    fn tunnel_closed(&self) {
        self.push(Event::TunnelClosed);
    }
}
