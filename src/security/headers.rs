//! Header hygiene for both directions of the HTTP path.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from outbound requests and returned responses
//! - Chain the client address onto X-Forwarded-For
//!
//! # Design Decisions
//! - Pure functions over `HeaderList`; they never fail
//! - Names are matched case-insensitively, survivors keep their spelling and order
//! - Prior X-Forwarded-For hops are kept verbatim; the current hop goes last

use std::net::IpAddr;

use http::HeaderValue;

use crate::http::request::HeaderList;

/// Headers that only describe a single transport leg.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Remove every hop-by-hop header. Returns how many entries were dropped.
pub fn strip_hop_by_hop(headers: &mut HeaderList) -> usize {
    let before = headers.len();
    headers.retain(|name, _| !is_hop_by_hop(name));
    before - headers.len()
}

/// Append `client_ip` to X-Forwarded-For, creating the header if absent.
///
/// Multiple X-Forwarded-For lines are folded into one, in their original order.
pub fn append_forwarded_for(headers: &mut HeaderList, client_ip: IpAddr) {
    let prior: Vec<&[u8]> = headers
        .get_all(X_FORWARDED_FOR)
        .map(HeaderValue::as_bytes)
        .filter(|v| !v.is_empty())
        .collect();

    let client = client_ip.to_string();
    let capacity = prior.iter().map(|v| v.len() + 2).sum::<usize>() + client.len();
    let mut chained = Vec::with_capacity(capacity);
    for hop in prior {
        chained.extend_from_slice(hop);
        chained.extend_from_slice(b", ");
    }
    chained.extend_from_slice(client.as_bytes());

    // Prior values were valid header bytes and the separator/IP are ASCII.
    match HeaderValue::from_bytes(&chained) {
        Ok(value) => headers.set(X_FORWARDED_FOR, value),
        Err(_) => headers.set(X_FORWARDED_FOR, client_value(client_ip)),
    }
}

fn client_value(client_ip: IpAddr) -> HeaderValue {
    HeaderValue::from_str(&client_ip.to_string()).unwrap_or(HeaderValue::from_static("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, &str)]) -> HeaderList {
        entries
            .iter()
            .map(|(n, v)| (n.to_string(), HeaderValue::from_str(v).unwrap()))
            .collect()
    }

    fn names(headers: &HeaderList) -> Vec<String> {
        headers.iter().map(|(n, _)| n.to_string()).collect()
    }

    #[test]
    fn strips_every_hop_by_hop_header_in_any_case() {
        let mut headers = list(&[
            ("Host", "example.test"),
            ("connection", "keep-alive"),
            ("KEEP-ALIVE", "timeout=5"),
            ("Proxy-Authenticate", "Basic"),
            ("proxy-authorization", "Basic Zm9vOmJhcg=="),
            ("Te", "trailers"),
            ("Trailers", "Expires"),
            ("Transfer-Encoding", "chunked"),
            ("uPgRaDe", "websocket"),
            ("X-Custom", "1"),
            ("Accept", "*/*"),
        ]);

        assert_eq!(strip_hop_by_hop(&mut headers), 8);
        assert_eq!(names(&headers), vec!["Host", "X-Custom", "Accept"]);
        assert_eq!(headers.get("x-custom").unwrap(), "1");
    }

    #[test]
    fn strip_without_hop_headers_is_noop() {
        let mut headers = list(&[("B", "2"), ("A", "1"), ("b", "3")]);
        let before = headers.clone();
        assert_eq!(strip_hop_by_hop(&mut headers), 0);
        assert_eq!(headers, before);
    }

    #[test]
    fn sets_forwarded_for_when_absent() {
        let mut headers = list(&[("Accept", "*/*")]);
        append_forwarded_for(&mut headers, "10.0.0.5".parse().unwrap());

        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.5");
        assert_eq!(names(&headers), vec!["Accept", "X-Forwarded-For"]);
    }

    #[test]
    fn appends_to_existing_chain() {
        let mut headers = list(&[
            ("x-forwarded-for", "203.0.113.7, 198.51.100.2"),
            ("Accept", "*/*"),
        ]);
        append_forwarded_for(&mut headers, "10.0.0.5".parse().unwrap());

        assert_eq!(
            headers.get(X_FORWARDED_FOR).unwrap(),
            "203.0.113.7, 198.51.100.2, 10.0.0.5"
        );
        assert_eq!(names(&headers), vec!["x-forwarded-for", "Accept"]);
    }

    #[test]
    fn folds_repeated_forwarded_for_lines() {
        let mut headers = list(&[
            ("X-Forwarded-For", "1.1.1.1"),
            ("Via", "1.1 edge"),
            ("X-Forwarded-For", "2.2.2.2"),
        ]);
        append_forwarded_for(&mut headers, "::1".parse().unwrap());

        assert_eq!(
            headers.get(X_FORWARDED_FOR).unwrap(),
            "1.1.1.1, 2.2.2.2, ::1"
        );
        assert_eq!(headers.get_all(X_FORWARDED_FOR).count(), 1);
        assert_eq!(names(&headers), vec!["X-Forwarded-For", "Via"]);
    }
}
