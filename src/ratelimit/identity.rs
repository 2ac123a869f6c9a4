//! Client identity extraction

use std::net::SocketAddr;

use crate::http::request::Request;

/// Key used to pick a client's rate limit bucket.
///
/// The first non-empty of `X-Real-IP`, `X-Forwarded-For` and the peer's IP
/// wins. Header values are used as sent (trimmed), so a multi-hop
/// `X-Forwarded-For` list keys one bucket as a whole.
pub fn client_identity(request: &Request, peer: SocketAddr) -> String {
    ["X-Real-IP", "X-Forwarded-For"]
        .iter()
        .filter_map(|name| request.header(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}
