//! CONNECT tunnels.
//!
//! # Responsibilities
//! - Dial the requested origin with bounded retries
//! - Take over the client connection once `200 Connection Established` is sent
//! - Relay bytes both ways until either side finishes, then report totals
//!
//! # Design Decisions
//! - Each direction runs in its own task with a pooled buffer; a direction that
//!   hits EOF or an error shuts down its writer so the peer sees end of stream
//! - Both sockets are owned by the relay and closed exactly once when it drops
//! - Byte counts are reported after both directions have stopped

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::Instrument;

use crate::error::ProxyError;
use crate::http::handler::ProxyHandler;
use crate::http::request::{normalize_connect_target, InboundRequest};
use crate::http::response::{self, ProxyBody};
use crate::net::buffer::{BufferPool, PooledBuffer};
use crate::net::connection::{force_closed, DrainState};
use crate::observability::sink::{ByteDirection, ErrorKind, TrafficKind, TunnelGauge};
use crate::resilience::retries::dial_with_retry;

/// Bytes carried by a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelTotals {
    pub client_to_origin: u64,
    pub origin_to_client: u64,
}

/// An established tunnel: the hijacked client stream and the origin stream.
pub struct TunnelSession<C, O> {
    client: C,
    origin: O,
    started: Instant,
}

impl<C, O> TunnelSession<C, O>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    O: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: C, origin: O, started: Instant) -> Self {
        Self {
            client,
            origin,
            started,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Copy bytes in both directions until both are done.
    ///
    /// Each write is bounded by `write_timeout`. Moving to `ForceClose` on
    /// `state` aborts both directions.
    pub async fn relay(
        self,
        buffers: &BufferPool,
        write_timeout: Duration,
        mut state: watch::Receiver<DrainState>,
    ) -> TunnelTotals {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (origin_read, origin_write) = tokio::io::split(self.origin);

        let upstream_bytes = Arc::new(AtomicU64::new(0));
        let downstream_bytes = Arc::new(AtomicU64::new(0));

        let upstream = tokio::spawn(copy_half(
            client_read,
            origin_write,
            buffers.acquire(),
            write_timeout,
            Arc::clone(&upstream_bytes),
        ));
        let downstream = tokio::spawn(copy_half(
            origin_read,
            client_write,
            buffers.acquire(),
            write_timeout,
            Arc::clone(&downstream_bytes),
        ));
        let aborts = [upstream.abort_handle(), downstream.abort_handle()];

        let both = async move {
            let (up, down) = tokio::join!(upstream, downstream);
            for result in [up, down] {
                if let Err(err) = result {
                    if err.is_panic() {
                        tracing::error!("Tunnel relay task panicked");
                    }
                }
            }
        };
        tokio::pin!(both);

        tokio::select! {
            _ = &mut both => {}
            _ = force_closed(&mut state) => {
                tracing::debug!("Force closing tunnel");
                for handle in &aborts {
                    handle.abort();
                }
                both.as_mut().await;
            }
        }

        TunnelTotals {
            client_to_origin: upstream_bytes.load(Ordering::SeqCst),
            origin_to_client: downstream_bytes.load(Ordering::SeqCst),
        }
    }
}

/// Copy `reader` into `writer` until EOF or error, counting delivered bytes.
async fn copy_half<R, W>(
    mut reader: R,
    mut writer: W,
    mut buffer: PooledBuffer,
    write_timeout: Duration,
    carried: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        buffer.clear();
        let read = match reader.read_buf(&mut *buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                tracing::debug!(error = %err, "Tunnel read ended");
                break;
            }
        };

        match tokio::time::timeout(write_timeout, writer.write_all(&buffer[..read])).await {
            Ok(Ok(())) => {
                carried.fetch_add(read as u64, Ordering::SeqCst);
            }
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "Tunnel write failed");
                break;
            }
            Err(_) => {
                tracing::debug!(timeout_secs = write_timeout.as_secs(), "Tunnel write timed out");
                break;
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        tracing::debug!(error = %err, "Tunnel shutdown failed");
    }
}

impl ProxyHandler {
    pub(crate) async fn open_tunnel(
        &self,
        inbound: InboundRequest,
        on_upgrade: OnUpgrade,
        started: Instant,
    ) -> Response<ProxyBody> {
        let method = "CONNECT";
        let sink = Arc::clone(&self.inner.sink);
        let gauge = TunnelGauge::new(Arc::clone(&sink));

        let target = match normalize_connect_target(&inbound.target) {
            Ok(target) => target,
            Err(err) => {
                return self.fail(TrafficKind::Tunnel, method, err.rejection_reason(), &err, started)
            }
        };

        let settings = &self.inner.settings;
        let dialed = dial_with_retry(&target, settings.dial_timeout, settings.retry, |attempt, err| {
            tracing::warn!(origin = %target, attempt, error = %err, "Dial failed, retrying");
            sink.record_error(ErrorKind::Retry, &format!("#{attempt}"));
        })
        .await;

        let origin = match dialed {
            Ok(origin) => origin,
            Err(source) => {
                let err = ProxyError::Dial { target, source };
                return self.fail(TrafficKind::Tunnel, method, "dial_failed", &err, started);
            }
        };

        let guard = self.inner.tracker.track();
        let state = guard.subscribe();
        let buffers = self.inner.buffers.clone();
        let write_timeout = settings.write_timeout;

        tokio::spawn(
            async move {
                let _guard = guard;
                let _gauge = gauge;

                let client = match on_upgrade.await {
                    Ok(upgraded) => TokioIo::new(upgraded),
                    Err(err) => {
                        tracing::warn!(origin = %target, error = %err, "Client connection was not handed over");
                        sink.record_error(ErrorKind::Tunnel, "upgrade_failed");
                        sink.record_request(method, "200", TrafficKind::Tunnel, started.elapsed());
                        return;
                    }
                };

                tracing::debug!(origin = %target, "Tunnel established");
                let session = TunnelSession::new(client, origin, started);
                let totals = session.relay(&buffers, write_timeout, state).await;

                let elapsed = started.elapsed();
                sink.record_request(method, "200", TrafficKind::Tunnel, elapsed);
                sink.record_bytes(ByteDirection::Sent, TrafficKind::Tunnel, totals.origin_to_client);
                sink.record_bytes(ByteDirection::Received, TrafficKind::Tunnel, totals.client_to_origin);

                tracing::info!(
                    origin = %target,
                    client_to_origin = totals.client_to_origin,
                    origin_to_client = totals.origin_to_client,
                    duration_ms = elapsed.as_millis() as u64,
                    "Tunnel closed"
                );
            }
            .in_current_span(),
        );

        response::connection_established()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionTracker;

    #[tokio::test]
    async fn relay_counts_both_directions() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (origin, mut origin_peer) = tokio::io::duplex(1024);
        let tracker = ConnectionTracker::new();
        let buffers = BufferPool::new(64, 4);

        let relay = tokio::spawn({
            let state = tracker.subscribe();
            let buffers = buffers.clone();
            async move {
                TunnelSession::new(client, origin, Instant::now())
                    .relay(&buffers, Duration::from_secs(5), state)
                    .await
            }
        });

        client_peer.write_all(b"hello").await.unwrap();
        let mut seen = [0u8; 5];
        origin_peer.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen, b"hello");

        origin_peer.write_all(b"goodbye").await.unwrap();
        let mut seen = [0u8; 7];
        client_peer.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen, b"goodbye");

        drop(client_peer);
        drop(origin_peer);

        let totals = relay.await.unwrap();
        assert_eq!(
            totals,
            TunnelTotals {
                client_to_origin: 5,
                origin_to_client: 7,
            }
        );
        assert_eq!(buffers.idle_count(), 2);
    }

    #[tokio::test]
    async fn force_close_stops_idle_relay() {
        let (client, _client_peer) = tokio::io::duplex(64);
        let (origin, _origin_peer) = tokio::io::duplex(64);
        let tracker = ConnectionTracker::new();
        let state = tracker.subscribe();

        let relay = tokio::spawn(async move {
            TunnelSession::new(client, origin, Instant::now())
                .relay(&BufferPool::default(), Duration::from_secs(5), state)
                .await
        });

        tracker.force_close();
        let totals = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay should stop on force close")
            .unwrap();
        assert_eq!(totals, TunnelTotals::default());
    }
}
