//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Derive the outbound request from the inbound one
//! - Exchange it with the origin through a pooled client
//! - Sanitize and return the origin response
//!
//! # Design Decisions
//! - One attempt only; upstream failures become 502 and are not retried
//! - The whole exchange (headers and body) is bounded by the response timeout
//! - Redirects are returned to the client, never followed

use std::time::Instant;

use bytes::Bytes;
use http::{Extensions, Method, Request, Response, Uri, Version};
use http_body_util::{BodyExt, Full};

use crate::error::{ProxyError, Result};
use crate::http::handler::ProxyHandler;
use crate::http::request::{HeaderList, InboundRequest};
use crate::http::response::{OutboundResponse, ProxyBody};
use crate::observability::sink::{ByteDirection, TrafficKind};
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

/// Request about to be sent to the origin.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderList,
    pub body: Bytes,
    pub extensions: Extensions,
}

impl OutboundRequest {
    pub fn into_hyper(self) -> Result<Request<Full<Bytes>>> {
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .version(Version::HTTP_11)
            .body(Full::new(self.body))?;
        self.headers.write_into(request.headers_mut());
        *request.extensions_mut() = self.extensions;
        Ok(request)
    }
}

/// Build the origin-bound copy of `inbound`.
///
/// Hop-by-hop headers are dropped and the client address is chained onto
/// X-Forwarded-For. The inbound request is left untouched.
pub fn prepare_outbound(inbound: &InboundRequest) -> Result<OutboundRequest> {
    let uri: Uri = inbound
        .target
        .parse()
        .map_err(|e| ProxyError::BadRequest(format!("invalid target '{}': {e}", inbound.target)))?;

    let mut headers = inbound.headers.clone();
    strip_hop_by_hop(&mut headers);
    append_forwarded_for(&mut headers, inbound.client_ip());

    Ok(OutboundRequest {
        method: inbound.method.clone(),
        uri,
        headers,
        body: inbound.body.clone(),
        extensions: inbound.extensions.clone(),
    })
}

impl ProxyHandler {
    pub(crate) async fn forward(&self, inbound: InboundRequest, started: Instant) -> Response<ProxyBody> {
        let method = inbound.method.as_str();

        let outbound = match prepare_outbound(&inbound) {
            Ok(outbound) => outbound,
            Err(err) => {
                return self.fail(TrafficKind::Http, method, err.rejection_reason(), &err, started)
            }
        };

        let mut upstream = match self.exchange(outbound).await {
            Ok(upstream) => upstream,
            Err(err) => {
                return self.fail(
                    TrafficKind::Http,
                    method,
                    "upstream_request_failed",
                    &err,
                    started,
                )
            }
        };

        strip_hop_by_hop(&mut upstream.headers);

        let sink = &self.inner.sink;
        let elapsed = started.elapsed();
        sink.record_request(method, upstream.status.as_str(), TrafficKind::Http, elapsed);
        sink.record_bytes(ByteDirection::Sent, TrafficKind::Http, upstream.body.len() as u64);
        sink.record_bytes(ByteDirection::Received, TrafficKind::Http, inbound.body.len() as u64);

        tracing::info!(
            target_uri = %inbound.target,
            status = upstream.status.as_u16(),
            request_bytes = inbound.body.len(),
            response_bytes = upstream.body.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Request forwarded"
        );

        upstream.into_response()
    }

    async fn exchange(&self, outbound: OutboundRequest) -> Result<OutboundResponse> {
        let request = outbound.into_hyper()?;
        let client = self.inner.pool.acquire();
        let limit = self.inner.settings.response_timeout;

        let exchange = async {
            let response = client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, ProxyError>(OutboundResponse {
                status: parts.status,
                headers: HeaderList::from_header_map(&parts.headers),
                body,
                extensions: parts.extensions,
            })
        };

        tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(limit))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn inbound(headers: HeaderList) -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            target: "http://origin.test/ip".to_string(),
            headers,
            body: Bytes::new(),
            remote_addr: "10.0.0.5:41000".parse().unwrap(),
            extensions: Extensions::new(),
        }
    }

    #[test]
    fn outbound_drops_hop_by_hop_and_adds_forwarded_for() {
        let headers: HeaderList = vec![
            ("Host", HeaderValue::from_static("origin.test")),
            ("Connection", HeaderValue::from_static("keep-alive")),
            ("Proxy-Authorization", HeaderValue::from_static("Basic Zm9v")),
            ("Accept", HeaderValue::from_static("*/*")),
        ]
        .into_iter()
        .collect();
        let inbound = inbound(headers);

        let outbound = prepare_outbound(&inbound).unwrap();

        let names: Vec<_> = outbound.headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Accept", "X-Forwarded-For"]);
        assert_eq!(outbound.headers.get("x-forwarded-for").unwrap(), "10.0.0.5");
        assert_eq!(outbound.uri, "http://origin.test/ip");
        // the inbound copy is not modified
        assert!(inbound.headers.contains("Connection"));
    }

    #[test]
    fn outbound_chains_existing_forwarded_for() {
        let headers: HeaderList = vec![("X-Forwarded-For", HeaderValue::from_static("1.2.3.4"))]
            .into_iter()
            .collect();

        let outbound = prepare_outbound(&inbound(headers)).unwrap();
        assert_eq!(
            outbound.headers.get("X-Forwarded-For").unwrap(),
            "1.2.3.4, 10.0.0.5"
        );
    }

    #[test]
    fn into_hyper_keeps_duplicate_headers() {
        let outbound = OutboundRequest {
            method: Method::POST,
            uri: "http://origin.test/submit".parse().unwrap(),
            headers: vec![
                ("Cookie", HeaderValue::from_static("a=1")),
                ("Cookie", HeaderValue::from_static("b=2")),
            ]
            .into_iter()
            .collect(),
            body: Bytes::from_static(b"payload"),
            extensions: Extensions::new(),
        };

        let request = outbound.into_hyper().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers().get_all("cookie").iter().count(), 2);
    }

    #[test]
    fn outbound_carries_inbound_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct ClientTag(u32);

        let mut inbound = inbound(HeaderList::new());
        inbound.extensions.insert(ClientTag(7));

        let request = prepare_outbound(&inbound).unwrap().into_hyper().unwrap();
        assert_eq!(request.extensions().get::<ClientTag>(), Some(&ClientTag(7)));
    }
}
