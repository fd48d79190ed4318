//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, bytes, errors, live gauges)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): completed requests by method, status, type
//! - `proxy_request_duration_seconds` (histogram): latency by method, type
//! - `proxy_bytes_sent_total` (counter): bytes delivered to clients by type
//! - `proxy_bytes_received_total` (counter): bytes received from clients by type
//! - `proxy_errors_total` (counter): errors by type, reason
//! - `proxy_active_connections` (gauge): live client connections
//! - `proxy_tunnel_connections` (gauge): live CONNECT tunnels
//!
//! # Design Decisions
//! - The sink owns its recorder; nothing is installed globally
//! - Low-overhead metric updates (atomic operations)
//! - Histogram buckets start at 1ms and double

use std::io;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::observability::sink::{ByteDirection, ErrorKind, ObservabilitySink, TrafficKind};

pub const REQUESTS_TOTAL: &str = "proxy_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "proxy_request_duration_seconds";
pub const BYTES_SENT_TOTAL: &str = "proxy_bytes_sent_total";
pub const BYTES_RECEIVED_TOTAL: &str = "proxy_bytes_received_total";
pub const ERRORS_TOTAL: &str = "proxy_errors_total";
pub const ACTIVE_CONNECTIONS: &str = "proxy_active_connections";
pub const TUNNEL_CONNECTIONS: &str = "proxy_tunnel_connections";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

fn duration_buckets() -> Vec<f64> {
    (0..15).map(|i| 0.001 * f64::from(1u32 << i)).collect()
}

/// Sink that records into a private Prometheus recorder.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                &duration_buckets(),
            )?
            .build_recorder();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(REQUESTS_TOTAL, "Total number of proxied requests");
            describe_histogram!(
                REQUEST_DURATION_SECONDS,
                Unit::Seconds,
                "Request duration in seconds"
            );
            describe_counter!(BYTES_SENT_TOTAL, Unit::Bytes, "Bytes sent to clients");
            describe_counter!(BYTES_RECEIVED_TOTAL, Unit::Bytes, "Bytes received from clients");
            describe_counter!(ERRORS_TOTAL, "Total number of errors");
            describe_gauge!(ACTIVE_CONNECTIONS, "Number of active client connections");
            describe_gauge!(TUNNEL_CONNECTIONS, "Number of active CONNECT tunnels");
        });

        Ok(Self { recorder })
    }

    /// Handle used to render the exposition text.
    pub fn handle(&self) -> PrometheusHandle {
        self.recorder.handle()
    }

    fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.recorder, f)
    }
}

impl ObservabilitySink for PrometheusSink {
    fn record_request(&self, method: &str, status: &str, kind: TrafficKind, duration: Duration) {
        let method = method.to_string();
        let status = status.to_string();
        self.record(|| {
            counter!(
                REQUESTS_TOTAL,
                "method" => method.clone(),
                "status" => status,
                "type" => kind.as_str()
            )
            .increment(1);
            histogram!(
                REQUEST_DURATION_SECONDS,
                "method" => method,
                "type" => kind.as_str()
            )
            .record(duration.as_secs_f64());
        });
    }

    fn record_bytes(&self, direction: ByteDirection, kind: TrafficKind, bytes: u64) {
        let name = match direction {
            ByteDirection::Sent => BYTES_SENT_TOTAL,
            ByteDirection::Received => BYTES_RECEIVED_TOTAL,
        };
        self.record(|| counter!(name, "type" => kind.as_str()).increment(bytes));
    }

    fn record_error(&self, kind: ErrorKind, reason: &str) {
        let reason = reason.to_string();
        self.record(|| {
            counter!(ERRORS_TOTAL, "type" => kind.as_str(), "reason" => reason).increment(1)
        });
    }

    fn connection_opened(&self) {
        self.record(|| gauge!(ACTIVE_CONNECTIONS).increment(1.0));
    }

    fn connection_closed(&self) {
        self.record(|| gauge!(ACTIVE_CONNECTIONS).decrement(1.0));
    }

    fn tunnel_opened(&self) {
        self.record(|| gauge!(TUNNEL_CONNECTIONS).increment(1.0));
    }

    fn tunnel_closed(&self) {
        self.record(|| gauge!(TUNNEL_CONNECTIONS).decrement(1.0));
    }
}

/// Serve the exposition text on `path` until `shutdown` fires.
pub async fn serve_metrics(
    listener: TcpListener,
    path: &str,
    handle: PrometheusHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    let upkeep = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
            loop {
                interval.tick().await;
                handle.run_upkeep();
            }
        })
    };

    let app = Router::new()
        .route(path, get(move || async move { handle.render() }))
        .layer(TraceLayer::new_for_http());

    tracing::info!(address = %listener.local_addr()?, path, "Metrics endpoint listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;

    upkeep.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_events() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_request("GET", "200", TrafficKind::Http, Duration::from_millis(12));
        sink.record_bytes(ByteDirection::Sent, TrafficKind::Tunnel, 42);
        sink.record_error(ErrorKind::Tunnel, "dial_failed");
        sink.tunnel_opened();

        let text = sink.handle().render();
        assert!(text.contains("proxy_requests_total{method=\"GET\",status=\"200\",type=\"http\"} 1"));
        assert!(text.contains("proxy_bytes_sent_total{type=\"tunnel\"} 42"));
        assert!(text.contains("proxy_errors_total{type=\"tunnel\",reason=\"dial_failed\"} 1"));
        assert!(text.contains("proxy_tunnel_connections 1"));
        assert!(text.contains("proxy_request_duration_seconds_bucket"));
    }

    #[test]
    fn buckets_double_from_one_millisecond() {
        let buckets = duration_buckets();
        assert_eq!(buckets.len(), 15);
        assert!((buckets[0] - 0.001).abs() < f64::EPSILON);
        assert!((buckets[3] - 0.008).abs() < 1e-12);
    }
}
