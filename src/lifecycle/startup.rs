//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the observability sink (Prometheus or no-op)
//! - Bind the proxy listener and, when enabled, the metrics listener
//! - Run until a signal or a server failure, then shut down in order
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot bind is fatal
//! - Listeners start last (traffic only when ready)
//! - Configuration and logging are set up by the caller

use std::sync::Arc;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::server::ProxyServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::net::listener::ListenerError;
use crate::observability::metrics::{serve_metrics, PrometheusSink};
use crate::observability::sink::{NoopSink, ObservabilitySink};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to build metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("proxy server failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("proxy server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

async fn bind(address: &str) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ListenerError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Run the proxy until SIGINT/SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();

    let sink: Arc<dyn ObservabilitySink> = if config.observability.metrics_enabled {
        let prometheus = PrometheusSink::new()?;
        let listener = bind(&config.observability.metrics_address).await?;
        let path = config.observability.metrics_path.clone();
        let handle = prometheus.handle();
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(err) = serve_metrics(listener, &path, handle, stop).await {
                tracing::error!(error = %err, "Metrics endpoint failed");
            }
        });
        Arc::new(prometheus)
    } else {
        tracing::info!("Metrics disabled");
        Arc::new(NoopSink)
    };

    let listener = bind(&config.listener.bind_address).await?;
    let server = ProxyServer::new(&config, sink);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections_per_ip = config.listener.max_connections_per_ip,
        dial_retries = config.upstream.dial_retries,
        "Forward proxy started"
    );

    tokio::select! {
        _ = shutdown_signal() => {
            shutdown.trigger();
            server_task.await?.map_err(StartupError::Server)?;
        }
        finished = &mut server_task => {
            shutdown.trigger();
            finished?.map_err(StartupError::Server)?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
