//! Error taxonomy for the forwarding engine.
//!
//! # Design Decisions
//! - Every failure is terminated at the request/tunnel boundary; nothing here
//!   is allowed to escape a connection task
//! - Inbound problems map to 4xx before any upstream work starts
//! - Upstream problems map to 502 and are never retried on the HTTP path

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Errors produced while handling a single proxied request or tunnel.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The inbound request could not be interpreted.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Absolute-form target with a scheme the HTTP path does not originate.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Inbound body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Inbound body was not received within the read timeout.
    #[error("timed out reading request body")]
    RequestTimeout,

    /// The inbound body stream failed.
    #[error("failed to read request body: {0}")]
    RequestBody(String),

    /// TCP dial to the origin failed after all attempts.
    #[error("dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The origin did not answer within the response timeout.
    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// Connection or protocol failure talking to the origin.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// The origin response body could not be read.
    #[error("upstream body failed: {0}")]
    UpstreamBody(#[from] hyper::Error),

    /// Outbound request could not be assembled.
    #[error("invalid outbound request: {0}")]
    InvalidOutbound(#[from] http::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status code presented to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_)
            | ProxyError::UnsupportedScheme(_)
            | ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ProxyError::Dial { .. }
            | ProxyError::UpstreamTimeout(_)
            | ProxyError::Upstream(_)
            | ProxyError::UpstreamBody(_)
            | ProxyError::InvalidOutbound(_)
            | ProxyError::Io(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Reason label used for error events on the inbound side.
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::RequestTimeout => "request_timeout",
            _ => "bad_request",
        }
    }

    /// True for failures detected before any upstream work.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
