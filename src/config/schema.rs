//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, per-client caps).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream client and dial settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections from a single client IP (0 = unlimited).
    pub max_connections_per_ip: usize,

    /// Requests served on one connection before it is closed (0 = unlimited).
    pub max_requests_per_connection: u32,

    /// Largest inbound request body accepted on the HTTP path.
    pub max_request_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections_per_ip: 10_000,
            max_requests_per_connection: 0,
            max_request_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to receive an inbound request body, in seconds.
    pub read_secs: u64,

    /// Bound on a single write inside a tunnel relay, in seconds.
    pub write_secs: u64,

    /// Keep-alive wait for the next request head, in seconds.
    pub idle_secs: u64,

    /// TCP dial timeout per attempt, in seconds.
    pub dial_secs: u64,

    /// Upstream response timeout (request sent to body received), in seconds.
    pub response_secs: u64,

    /// Drain deadline during shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl TimeoutConfig {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs)
    }

    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 30,
            write_secs: 30,
            idle_secs: 120,
            dial_secs: 10,
            response_secs: 60,
            shutdown_secs: 30,
        }
    }
}

/// Upstream client pool and dial configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Idle connections each pooled client keeps per origin host.
    pub max_connections_per_host: usize,

    /// Extra dial attempts for CONNECT targets (total attempts = retries + 1).
    pub dial_retries: u32,

    /// Fixed delay between dial attempts in milliseconds.
    pub dial_retry_delay_ms: u64,
}

impl UpstreamConfig {
    pub fn dial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.dial_retry_delay_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 1000,
            dial_retries: 2,
            dial_retry_delay_ms: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "console" or "json".
    pub log_format: String,

    /// Log destination: "stdout", "stderr" or a file path.
    pub log_output: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// HTTP path the metrics are served on.
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "console".to_string(),
            log_output: "stdout".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:3128"

            [upstream]
            dial_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3128");
        assert_eq!(config.listener.max_connections_per_ip, 10_000);
        assert_eq!(config.upstream.dial_retries, 0);
        assert_eq!(config.upstream.dial_retry_delay_ms, 100);
        assert_eq!(config.timeouts.response(), Duration::from_secs(60));
        assert_eq!(config.observability.metrics_path, "/metrics");
    }
}
