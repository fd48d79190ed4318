//! Per-request entry point.
//!
//! # Responsibilities
//! - Classify each request as a CONNECT tunnel or a plain HTTP forward
//! - Reject unusable requests with a 4xx before touching the network
//! - Emit exactly one completion event per request or tunnel
//!
//! # Design Decisions
//! - Generic over the inbound body type, so the engine can be driven without a
//!   socket (tests, embedding)
//! - Every request runs inside a span carrying a fresh request id

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, Request, Response};
use hyper::body::Body;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{BodyLimits, InboundRequest};
use crate::http::response::{self, ProxyBody};
use crate::net::buffer::BufferPool;
use crate::net::connection::ConnectionTracker;
use crate::observability::sink::{ObservabilitySink, TrafficKind};
use crate::resilience::retries::RetryPolicy;
use crate::upstream::pool::{ClientPool, ClientSettings, IDLE_CONNECTION_TTL};

/// Knobs the handler applies to every request.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Bound on the whole upstream exchange of a forwarded request.
    pub response_timeout: Duration,
    /// Bound on each TCP dial attempt for a tunnel.
    pub dial_timeout: Duration,
    /// Bound on each write while relaying tunnel bytes.
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    pub body_limits: BodyLimits,
}

impl HandlerSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            response_timeout: config.timeouts.response(),
            dial_timeout: config.timeouts.dial(),
            write_timeout: config.timeouts.write(),
            retry: RetryPolicy::new(
                config.upstream.dial_retries,
                config.upstream.dial_retry_delay(),
            ),
            body_limits: BodyLimits {
                max_bytes: config.listener.max_request_body_bytes,
                read_timeout: config.timeouts.read(),
            },
        }
    }
}

pub(crate) struct HandlerInner {
    pub(crate) pool: Arc<ClientPool>,
    pub(crate) sink: Arc<dyn ObservabilitySink>,
    pub(crate) buffers: BufferPool,
    pub(crate) tracker: ConnectionTracker,
    pub(crate) settings: HandlerSettings,
}

/// The forwarding engine. Cheap to clone; clones share pools and sink.
#[derive(Clone)]
pub struct ProxyHandler {
    pub(crate) inner: Arc<HandlerInner>,
}

impl ProxyHandler {
    pub fn new(
        config: &ProxyConfig,
        sink: Arc<dyn ObservabilitySink>,
        tracker: ConnectionTracker,
    ) -> Self {
        let pool = ClientPool::new(ClientSettings {
            max_connections_per_host: config.upstream.max_connections_per_host,
            dial_timeout: config.timeouts.dial(),
            idle_timeout: IDLE_CONNECTION_TTL,
        });
        Self::with_parts(
            HandlerSettings::from_config(config),
            Arc::new(pool),
            sink,
            tracker,
        )
    }

    pub fn with_parts(
        settings: HandlerSettings,
        pool: Arc<ClientPool>,
        sink: Arc<dyn ObservabilitySink>,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                pool,
                sink,
                buffers: BufferPool::default(),
                tracker,
                settings,
            }),
        }
    }

    pub fn sink(&self) -> &Arc<dyn ObservabilitySink> {
        &self.inner.sink
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.inner.tracker
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.inner.settings
    }

    /// Handle one request from `remote_addr`.
    ///
    /// Never fails: every error becomes a response. A `200` to CONNECT means
    /// the tunnel relay starts once the connection is upgraded.
    pub async fn handle<B>(&self, mut request: Request<B>, remote_addr: SocketAddr) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let span = tracing::info_span!(
            "request",
            id = %Uuid::new_v4(),
            client = %remote_addr,
            method = %request.method(),
        );

        async move {
            if request.method() == Method::CONNECT {
                let on_upgrade = hyper::upgrade::on(&mut request);
                return match InboundRequest::connect(&request, remote_addr) {
                    Ok(inbound) => self.open_tunnel(inbound, on_upgrade, started).await,
                    Err(err) => self.fail(
                        TrafficKind::Tunnel,
                        Method::CONNECT.as_str(),
                        err.rejection_reason(),
                        &err,
                        started,
                    ),
                };
            }

            let method = request.method().clone();
            match InboundRequest::read(request, remote_addr, self.inner.settings.body_limits).await {
                Ok(inbound) => self.forward(inbound, started).await,
                Err(err) => self.fail(
                    TrafficKind::Http,
                    method.as_str(),
                    err.rejection_reason(),
                    &err,
                    started,
                ),
            }
        }
        .instrument(span)
        .await
    }

    /// Report a failed request and build its diagnostic response.
    pub(crate) fn fail(
        &self,
        kind: TrafficKind,
        method: &str,
        reason: &str,
        err: &ProxyError,
        started: Instant,
    ) -> Response<ProxyBody> {
        let status = err.status_code();
        let sink = &self.inner.sink;
        sink.record_error(kind.into(), reason);
        sink.record_request(method, status.as_str(), kind, started.elapsed());

        if err.is_client_error() {
            tracing::info!(status = status.as_u16(), reason, error = %err, "Request rejected");
        } else {
            tracing::warn!(status = status.as_u16(), reason, error = %err, "Request failed");
        }
        response::proxy_error(err)
    }
}
