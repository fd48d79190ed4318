//! Retry logic for origin dials.
//!
//! # Responsibilities
//! - Bound the number of attempts (retries + 1)
//! - Wait a fixed delay between attempts
//! - Report every failed attempt that will be retried
//!
//! # Design Decisions
//! - Linear, fixed delay; tail latency stays predictable
//! - Only the CONNECT dial is retried, never an established tunnel or an
//!   HTTP forward
//! - Sleeping suspends only the dialing task
//! - Zero retries means exactly one attempt

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::resilience::timeouts::connect_with_timeout;

/// Fixed attempt budget and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Total attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called with the
/// attempt number and error of each failure that is followed by another attempt.
/// The last error is returned once attempts run out.
pub async fn retry_with_delay<T, E, Op, Fut, OnRetry>(
    policy: RetryPolicy,
    mut operation: Op,
    mut on_retry: OnRetry,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnRetry: FnMut(u32, &E),
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                on_retry(attempt, &err);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Dial `target` over TCP under `policy`, each attempt bounded by `dial_timeout`.
pub async fn dial_with_retry<OnRetry>(
    target: &str,
    dial_timeout: Duration,
    policy: RetryPolicy,
    on_retry: OnRetry,
) -> io::Result<TcpStream>
where
    OnRetry: FnMut(u32, &io::Error),
{
    retry_with_delay(
        policy,
        |attempt| {
            tracing::trace!(origin = %target, attempt, "Dialing origin");
            connect_with_timeout(target, dial_timeout)
        },
        on_retry,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn refused() -> io::Error {
        io::Error::from(io::ErrorKind::ConnectionRefused)
    }

    #[tokio::test]
    async fn always_failing_makes_retries_plus_one_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let mut attempts = Vec::new();
        let mut retried = Vec::new();
        let start = Instant::now();

        let result: Result<(), io::Error> = retry_with_delay(
            policy,
            |attempt| {
                attempts.push(attempt);
                async { Err(refused()) }
            },
            |attempt, _| retried.push(attempt),
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(retried, vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let mut retried = 0;

        let result = retry_with_delay(
            policy,
            |attempt| {
                calls += 1;
                async move {
                    if attempt < 2 {
                        Err(refused())
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_, _| retried += 1,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
        assert_eq!(retried, 1);
    }

    #[tokio::test]
    async fn zero_retries_dials_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(10));
        let mut calls = 0;
        let mut retried = 0;
        let start = Instant::now();

        let result: Result<(), io::Error> = retry_with_delay(
            policy,
            |_| {
                calls += 1;
                async { Err(refused()) }
            },
            |_, _| retried += 1,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert_eq!(retried, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dial_reaches_listening_origin() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = dial_with_retry(
            &addr,
            Duration::from_secs(1),
            RetryPolicy::new(1, Duration::from_millis(1)),
            |_, _| panic!("no retry expected"),
        )
        .await
        .unwrap();
        assert_eq!(stream.peer_addr().unwrap().to_string(), addr);
    }
}
