//! Timeout enforcement for origin dials.
//!
//! # Responsibilities
//! - Bound a single TCP connect attempt
//! - Report expiry as an ordinary `io::Error` so callers can retry it
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timed-out dials surface as `ErrorKind::TimedOut`

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Connect to `target` (`host:port`), giving up after `timeout`.
pub async fn connect_with_timeout(target: &str, timeout: Duration) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(target))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dial {target} timed out after {timeout:?}"),
            )
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}
