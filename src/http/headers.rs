//! Hop-by-hop header stripping.
//!
//! # Responsibilities
//! - Strip headers that only apply to a single transport hop
//! - Strip headers nominated by the client's `Connection` header, except `Host`
//!
//! # Design Decisions
//! - Stripping is unconditional and idempotent
//! - Hop-by-hop names match ASCII case-insensitively

use crate::http::request::Request;

/// Headers that never cross a proxy hop.
pub const HOP_BY_HOP: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "TE",
    "Trailer",
    "Trailers",
    "Transfer-Encoding",
    "Upgrade",
];

/// Remove hop-by-hop and proxy-only headers from `request`.
///
/// Returns the number of headers removed.
pub fn strip_proxy_headers(request: &mut Request) -> usize {
    let nominated: Vec<String> = request
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("Connection"))
        .flat_map(|(_, value)| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty() && !token.eq_ignore_ascii_case("Host"))
        .collect();

    request.headers.remove_where(|name| {
        HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
            || nominated.iter().any(|n| n.eq_ignore_ascii_case(name))
    })
}
