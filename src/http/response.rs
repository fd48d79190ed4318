//! Responses produced by the proxy.
//!
//! # Responsibilities
//! - Carry the origin response back to the client (`OutboundResponse`)
//! - Build the proxy's own responses: diagnostics and CONNECT establishment
//!
//! # Design Decisions
//! - Diagnostics are short plaintext bodies: `Proxy error: <cause>`
//! - Bodies are fully buffered `Full<Bytes>`

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Extensions, Response, StatusCode};
use http_body_util::Full;
use hyper::ext::ReasonPhrase;

use crate::error::ProxyError;
use crate::http::request::HeaderList;

/// Body type of every response the proxy writes.
pub type ProxyBody = Full<Bytes>;

/// Response received from the origin, before it is handed to the client.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderList,
    pub body: Bytes,
    /// Extensions of the origin response; they carry the header spelling the
    /// origin used back to the client connection.
    pub extensions: Extensions,
}

impl OutboundResponse {
    pub fn into_response(self) -> Response<ProxyBody> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        self.headers.write_into(response.headers_mut());
        *response.extensions_mut() = self.extensions;
        response
    }
}

/// Plaintext response with the given status.
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Diagnostic response for a failed request.
pub fn proxy_error(err: &ProxyError) -> Response<ProxyBody> {
    text(err.status_code(), format!("Proxy error: {err}"))
}

/// `200 Connection Established` with an empty body.
pub fn connection_established() -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}
