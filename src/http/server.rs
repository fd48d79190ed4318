//! Client-facing HTTP/1.1 server.
//!
//! # Responsibilities
//! - Accept client connections and apply per-IP admission
//! - Serve each connection with hyper, with upgrades enabled for CONNECT
//! - Apply the idle keep-alive timeout and the per-connection request cap
//! - Drain on shutdown, then force close whatever is left at the deadline
//!
//! # Design Decisions
//! - One task per connection, owned by a `JoinSet` so shutdown can abort them
//! - Each connection holds its tracker guard and IP permit until it ends

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderValue, CONNECTION};
use http::{Method, Request};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::ProxyConfig;
use crate::http::handler::ProxyHandler;
use crate::net::connection::{
    draining, force_closed, ConnectionGuard, ConnectionId, ConnectionTracker,
};
use crate::net::listener::{refuse, Admission, Listener};
use crate::observability::sink::{ConnectionGauge, ErrorKind, ObservabilitySink};
use crate::security::limits::IpPermit;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Time given to aborted work to unwind after a force close.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection-level settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// 0 = unlimited.
    pub max_connections_per_ip: usize,
    /// 0 = unlimited.
    pub max_requests_per_connection: u32,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            max_connections_per_ip: config.listener.max_connections_per_ip,
            max_requests_per_connection: config.listener.max_requests_per_connection,
            idle_timeout: config.timeouts.idle(),
            shutdown_timeout: config.timeouts.shutdown(),
        }
    }
}

/// Forward proxy server.
pub struct ProxyServer {
    handler: ProxyHandler,
    tracker: ConnectionTracker,
    settings: ServerSettings,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, sink: Arc<dyn ObservabilitySink>) -> Self {
        let tracker = ConnectionTracker::new();
        let handler = ProxyHandler::new(config, sink, tracker.clone());
        Self {
            handler,
            tracker,
            settings: ServerSettings::from_config(config),
        }
    }

    pub fn handler(&self) -> &ProxyHandler {
        &self.handler
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let listener = Listener::from_tcp(listener, self.settings.max_connections_per_ip);
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "Proxy listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(Admission::Admitted(stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.handler.clone(),
                            self.settings.clone(),
                            guard,
                            permit,
                        ));
                    }
                    Ok(Admission::Rejected(stream, _)) => {
                        self.handler.sink().record_error(ErrorKind::Http, "per_ip_limit");
                        connections.spawn(refuse(stream));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!("Connection task panicked");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        self.drain(connections).await;
        Ok(())
    }

    async fn drain(&self, mut connections: JoinSet<()>) {
        let timeout = self.settings.shutdown_timeout;
        tracing::info!(
            active = self.tracker.active_count(),
            timeout_secs = timeout.as_secs(),
            "Draining connections"
        );

        self.tracker.begin_drain();
        if !self.tracker.wait_idle(Instant::now() + timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain deadline passed, closing remaining connections"
            );
            self.tracker.force_close();
            connections.abort_all();
        }

        while connections.join_next().await.is_some() {}

        // Tunnels run outside the set; they stop on ForceClose.
        if !self.tracker.wait_idle(Instant::now() + FORCE_CLOSE_GRACE).await {
            tracing::warn!(remaining = self.tracker.active_count(), "Work still running at exit");
        }
        tracing::info!("Proxy stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: ProxyHandler,
    settings: ServerSettings,
    guard: ConnectionGuard,
    _permit: IpPermit,
) {
    let _gauge = ConnectionGauge::new(Arc::clone(handler.sink()));
    let mut state = guard.subscribe();
    let connection_id = guard.id();
    let max_requests = settings.max_requests_per_connection;
    let served = AtomicU32::new(0);

    let service = service_fn(move |request: Request<Incoming>| {
        let handler = handler.clone();
        let count = served.fetch_add(1, Ordering::Relaxed) + 1;
        let is_connect = request.method() == Method::CONNECT;
        async move {
            let mut response = handler.handle(request, peer).await;
            if max_requests > 0 && count >= max_requests && !is_connect {
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("close"));
            }
            Ok::<_, Infallible>(response)
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(settings.idle_timeout)
        .preserve_header_case(true)
        .keep_alive(true);

    let connection = builder
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => log_connection_end(result, connection_id, peer),
        _ = draining(&mut state) => {
            connection.as_mut().graceful_shutdown();
            tokio::select! {
                result = connection.as_mut() => log_connection_end(result, connection_id, peer),
                _ = force_closed(&mut state) => {
                    tracing::debug!(%connection_id, peer_addr = %peer, "Connection force closed");
                }
            }
        }
    }
}

fn log_connection_end(
    result: Result<(), hyper::Error>,
    connection_id: ConnectionId,
    peer: SocketAddr,
) {
    match result {
        Ok(()) => tracing::trace!(%connection_id, peer_addr = %peer, "Connection finished"),
        Err(err) => {
            tracing::debug!(%connection_id, peer_addr = %peer, error = %err, "Connection ended with error")
        }
    }
}
