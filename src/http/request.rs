//! Inbound request model and target resolution.
//!
//! # Responsibilities
//! - Capture the inbound request in an engine-owned form (`InboundRequest`)
//! - Resolve the forwarding target (absolute URI or CONNECT authority)
//! - Enforce body size and read-time limits before any upstream work
//!
//! # Design Decisions
//! - Headers live in an ordered list, not a map, so removals never reorder
//!   the survivors
//! - The request's extensions travel with it; hyper keeps the original header
//!   spelling there and reapplies it when the request is written upstream
//! - Bodies are `Bytes`; copying a request shares the buffer
//! - Malformed targets are rejected here and become 4xx responses

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::uri::{Authority, Scheme};
use http::{Extensions, Method, Request, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::upgrade::OnUpgrade;

use crate::error::{ProxyError, Result};

/// Port appended to CONNECT targets that do not name one.
pub const DEFAULT_TUNNEL_PORT: u16 = 443;

/// Ordered header multimap.
///
/// Keeps the names exactly as inserted and the relative order of every entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderList {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry at the end.
    pub fn push(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.entries.push((name.into(), value));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// All values for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every `name` entry with a single value.
    ///
    /// The value takes the position (and spelling) of the first existing entry,
    /// or is appended when there was none.
    pub fn set(&mut self, name: &str, value: HeaderValue) {
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.push(name, value),
        }
    }

    /// Remove every entry for which `keep` returns false.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &HeaderValue) -> bool,
    {
        self.entries.retain(|(n, v)| keep(n, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy a `HeaderMap` keeping its iteration order.
    ///
    /// For a map parsed off the wire, distinct names keep their wire order;
    /// repeated names are grouped at their first occurrence.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut list = Self::with_capacity(map.len());
        for (name, value) in map {
            list.push(name.as_str(), value.clone());
        }
        list
    }

    /// Append every entry to `map`. Entries with names that are not valid
    /// header tokens are dropped.
    pub fn write_into(&self, map: &mut HeaderMap) {
        for (name, value) in &self.entries {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => {
                    map.append(name, value.clone());
                }
                Err(_) => tracing::debug!(header = %name, "Dropping invalid header name"),
            }
        }
    }
}

impl<N: Into<String>> FromIterator<(N, HeaderValue)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (N, HeaderValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }
}

/// Limits applied while reading an inbound body.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub max_bytes: usize,
    pub read_timeout: Duration,
}

/// A request as received from the client.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Absolute `http://` URI for forwarded requests, `host:port` for CONNECT.
    pub target: String,
    pub headers: HeaderList,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
    /// Connection-level metadata attached by hyper, including the original
    /// spelling of header names.
    pub extensions: Extensions,
}

impl InboundRequest {
    /// Read a non-CONNECT request, collecting its body under `limits`.
    pub async fn read<B>(
        request: Request<B>,
        remote_addr: SocketAddr,
        limits: BodyLimits,
    ) -> Result<Self>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (mut parts, body) = request.into_parts();
        let target = resolve_http_target(&parts.uri, &parts.headers)?;
        // A pending upgrade belongs to the client connection, not the origin.
        parts.extensions.remove::<OnUpgrade>();

        let collected = tokio::time::timeout(
            limits.read_timeout,
            Limited::new(body, limits.max_bytes).collect(),
        )
        .await
        .map_err(|_| ProxyError::RequestTimeout)?;

        let body = match collected {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.is::<LengthLimitError>() => {
                return Err(ProxyError::PayloadTooLarge {
                    limit: limits.max_bytes,
                })
            }
            Err(err) => return Err(ProxyError::RequestBody(err.to_string())),
        };

        Ok(Self {
            method: parts.method,
            target,
            headers: HeaderList::from_header_map(&parts.headers),
            body,
            remote_addr,
            extensions: parts.extensions,
        })
    }

    /// Capture a CONNECT request. The body is never read.
    pub fn connect<B>(request: &Request<B>, remote_addr: SocketAddr) -> Result<Self> {
        let target = match request.uri().authority() {
            Some(authority) => authority.as_str().to_string(),
            None => host_header(request.headers())?.to_string(),
        };

        Ok(Self {
            method: Method::CONNECT,
            target,
            headers: HeaderList::from_header_map(request.headers()),
            body: Bytes::new(),
            remote_addr,
            extensions: Extensions::new(),
        })
    }

    pub fn client_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }
}

fn host_header(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("missing Host header".into()))
}

/// Turn the request line URI into an absolute `http://` target.
///
/// Absolute-form URIs are taken as they are; origin-form URIs are resolved
/// against the `Host` header.
pub fn resolve_http_target(uri: &Uri, headers: &HeaderMap) -> Result<String> {
    if let Some(scheme) = uri.scheme() {
        if *scheme != Scheme::HTTP {
            return Err(ProxyError::UnsupportedScheme(scheme.as_str().to_string()));
        }
        if uri.authority().is_none() {
            return Err(ProxyError::BadRequest(format!("no host in '{uri}'")));
        }
        return Ok(uri.to_string());
    }

    let host = host_header(headers)?;
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let target = format!("http://{host}{path}");
    target
        .parse::<Uri>()
        .map_err(|e| ProxyError::BadRequest(format!("invalid target '{target}': {e}")))?;
    Ok(target)
}

/// Normalize a CONNECT target to `host:port`, defaulting the port to 443.
pub fn normalize_connect_target(target: &str) -> Result<String> {
    let target = target.trim();
    let authority: Authority = target
        .parse()
        .map_err(|_| ProxyError::BadRequest(format!("invalid CONNECT target '{target}'")))?;

    if authority.host().is_empty() {
        return Err(ProxyError::BadRequest(format!(
            "invalid CONNECT target '{target}'"
        )));
    }

    match authority.port_u16() {
        Some(port) => Ok(format!("{}:{}", authority.host(), port)),
        None => Ok(format!("{}:{}", authority.host(), DEFAULT_TUNNEL_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn value(s: &'static str) -> HeaderValue {
        HeaderValue::from_static(s)
    }

    #[test]
    fn header_list_lookup_is_case_insensitive() {
        let mut headers = HeaderList::new();
        headers.push("X-Trace", value("a"));
        headers.push("x-trace", value("b"));

        assert_eq!(headers.get("X-TRACE"), Some(&value("a")));
        assert_eq!(headers.get_all("x-Trace").count(), 2);
    }

    #[test]
    fn header_list_value_outlives_lookup_name() {
        let headers: HeaderList = vec![("X-Trace", value("a"))].into_iter().collect();

        let found = {
            let name = String::from("x-trace");
            headers.get(&name)
        };
        assert_eq!(found, Some(&value("a")));
    }

    #[test]
    fn header_list_set_keeps_first_position() {
        let mut headers: HeaderList = vec![
            ("Accept", value("*/*")),
            ("X-Forwarded-For", value("1.1.1.1")),
            ("User-Agent", value("t")),
            ("x-forwarded-for", value("2.2.2.2")),
        ]
        .into_iter()
        .collect();

        headers.set("x-forwarded-for", value("9.9.9.9"));

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Accept", "X-Forwarded-For", "User-Agent"]);
        assert_eq!(headers.get("X-Forwarded-For"), Some(&value("9.9.9.9")));
    }

    #[test]
    fn connect_target_gets_default_port() {
        assert_eq!(
            normalize_connect_target("example.test").unwrap(),
            "example.test:443"
        );
        assert_eq!(
            normalize_connect_target("example.test:8443").unwrap(),
            "example.test:8443"
        );
        assert_eq!(normalize_connect_target("[::1]").unwrap(), "[::1]:443");
        assert_eq!(normalize_connect_target("[::1]:22").unwrap(), "[::1]:22");
        assert!(normalize_connect_target("").is_err());
        assert!(normalize_connect_target("bad host").is_err());
    }

    #[test]
    fn absolute_http_target_is_kept() {
        let uri: Uri = "http://example.test/ip?x=1".parse().unwrap();
        assert_eq!(
            resolve_http_target(&uri, &HeaderMap::new()).unwrap(),
            "http://example.test/ip?x=1"
        );
    }

    #[test]
    fn origin_form_uses_host_header() {
        let uri: Uri = "/ip".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, value("example.test:8080"));

        assert_eq!(
            resolve_http_target(&uri, &headers).unwrap(),
            "http://example.test:8080/ip"
        );
        assert!(matches!(
            resolve_http_target(&uri, &HeaderMap::new()),
            Err(ProxyError::BadRequest(_))
        ));
    }

    #[test]
    fn https_target_is_rejected() {
        let uri: Uri = "https://example.test/".parse().unwrap();
        assert!(matches!(
            resolve_http_target(&uri, &HeaderMap::new()),
            Err(ProxyError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn read_enforces_body_limit() {
        let limits = BodyLimits {
            max_bytes: 4,
            read_timeout: Duration::from_secs(1),
        };
        let request = Request::post("http://example.test/upload")
            .body(Full::new(Bytes::from_static(b"too large")))
            .unwrap();

        let err = InboundRequest::read(request, "10.0.0.5:4000".parse().unwrap(), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn read_captures_request() {
        let limits = BodyLimits {
            max_bytes: 1024,
            read_timeout: Duration::from_secs(1),
        };
        let request = Request::post("http://example.test/upload")
            .header("Content-Type", "text/plain")
            .body(Full::new(Bytes::from_static(b"hello")))
            .unwrap();

        let inbound = InboundRequest::read(request, "10.0.0.5:4000".parse().unwrap(), limits)
            .await
            .unwrap();
        assert_eq!(inbound.method, Method::POST);
        assert_eq!(inbound.target, "http://example.test/upload");
        assert_eq!(inbound.body, Bytes::from_static(b"hello"));
        assert_eq!(inbound.client_ip().to_string(), "10.0.0.5");
        assert!(inbound.headers.contains("content-type"));
    }
}
