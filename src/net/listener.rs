//! TCP listener with per-client admission.
//!
//! # Responsibilities
//! - Bind to configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections_per_ip via the per-IP limiter
//! - Graceful handling of accept errors

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::security::limits::{IpPermit, PerIpLimiter};

/// Response written to clients over their connection cap.
const OVER_LIMIT_RESPONSE: &[u8] =
    b"HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// Outcome of one accept.
#[derive(Debug)]
pub enum Admission {
    /// Connection may be served; the permit must live as long as it does.
    Admitted(TcpStream, SocketAddr, IpPermit),
    /// Client is over its cap.
    Rejected(TcpStream, SocketAddr),
}

/// A TCP listener that limits concurrent connections per client IP.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    limiter: PerIpLimiter,
}

impl Listener {
    /// Bind to `address` with the given per-IP cap (0 = unlimited).
    pub async fn bind(address: &str, max_connections_per_ip: usize) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;
        Ok(Self::from_tcp(listener, max_connections_per_ip))
    }

    /// Wrap an already-bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections_per_ip: usize) -> Self {
        Self {
            inner: listener,
            limiter: PerIpLimiter::new(max_connections_per_ip),
        }
    }

    /// Accept the next connection and decide whether it is admitted.
    pub async fn accept(&self) -> Result<Admission, ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        match self.limiter.try_acquire(addr.ip()) {
            Some(permit) => {
                tracing::debug!(peer_addr = %addr, "Connection accepted");
                Ok(Admission::Admitted(stream, addr, permit))
            }
            None => {
                tracing::warn!(
                    peer_addr = %addr,
                    limit = self.limiter.max_per_ip(),
                    "Per-IP connection limit reached"
                );
                Ok(Admission::Rejected(stream, addr))
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn limiter(&self) -> &PerIpLimiter {
        &self.limiter
    }
}

/// Tell an over-limit client why it is being dropped, then close.
pub async fn refuse(mut stream: TcpStream) {
    let _ = stream.write_all(OVER_LIMIT_RESPONSE).await;
    let _ = stream.shutdown().await;
}
