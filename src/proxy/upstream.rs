//! Upstream connection and request forwarding
//!
//! This module handles connecting to backend servers, rewriting requests
//! for them and reading their responses back.

use crate::config::ProxyConfig;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::backend::{Backend, host_header};
use anyhow::{Context, Result};
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a backend's response head
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

/// Sends a client request to a chosen backend.
///
/// An `Err` means the transport failed; the caller treats the backend as
/// dead. Any HTTP answer, including 5xx, is `Ok`.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(
        &self,
        backend: &Backend,
        request: &Request,
        peer: IpAddr,
    ) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP/1.1 client speaking to backends over plain TCP.
///
/// Every exchange uses a fresh connection with `Connection: close`.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Request timeout duration, covering write and full response read
    request_timeout: Duration,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(cfg: &ProxyConfig) -> Self {
        Self::new(cfg.connect_timeout(), cfg.request_timeout())
    }

    /// Forward a client request to `backend` and return its response.
    pub async fn forward(&self, backend: &Backend, request: &Request, peer: IpAddr) -> Result<Response> {
        let outbound = build_outbound_request(request, backend, peer);
        self.send(backend.url(), &outbound).await
    }

    /// Issue `GET {base path}{path}` against a backend.
    pub async fn get(&self, base: &Url, path: &str) -> Result<Response> {
        let mut request = Request {
            method: Method::GET,
            path: join_path(base.path(), path),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        };
        request.set_header("Host", host_header(base));
        request.set_header("User-Agent", concat!("tollgate/", env!("CARGO_PKG_VERSION")));
        request.set_header("Connection", "close");

        self.send(base, &request).await
    }

    /// Send an already-rewritten request to the server at `url`.
    pub async fn send(&self, url: &Url, request: &Request) -> Result<Response> {
        let host = url.host_str().context("Backend URL missing host")?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        // Connect to backend with timeout
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .with_context(|| format!("connect to {addr} timed out"))?
            .with_context(|| format!("failed to connect to {addr}"))?;

        tracing::trace!(backend = %url, "Connected to backend");

        timeout(self.request_timeout, exchange(stream, request))
            .await
            .with_context(|| format!("request to {addr} timed out"))?
    }
}

impl Forwarder for HttpForwarder {
    async fn forward(&self, backend: &Backend, request: &Request, peer: IpAddr) -> Result<Response> {
        HttpForwarder::forward(self, backend, request, peer).await
    }
}

/// Rewrite a client request for `backend`.
///
/// - the target is joined onto the backend's base path
/// - `Host` becomes the backend's own host
/// - hop-by-hop headers, and any named in `Connection`, are dropped
/// - the peer IP is appended to `X-Forwarded-For`
/// - `Connection: close` is added
/// - `Expect` is dropped, the body having been read in full already
pub fn build_outbound_request(request: &Request, backend: &Backend, peer: IpAddr) -> Request {
    let mut outbound = request.clone();
    outbound.path = join_path(backend.url().path(), &request.path);

    if let Some(listed) = request.header("Connection") {
        for name in listed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            outbound.remove_header(name);
        }
    }
    for name in HOP_BY_HOP {
        outbound.remove_header(name);
    }
    outbound.remove_header("Expect");

    outbound.set_header("Host", backend.host_header());

    let forwarded_for = match request.header("X-Forwarded-For") {
        Some(prior) if !prior.trim().is_empty() => format!("{}, {peer}", prior.trim()),
        _ => peer.to_string(),
    };
    outbound.set_header("X-Forwarded-For", forwarded_for);
    outbound.set_header("Connection", "close");

    if !outbound.body.is_empty() {
        outbound.set_header("Content-Length", outbound.body.len().to_string());
    }

    outbound
}

/// Join a backend base path and a client request target with one slash.
///
/// ```
/// # use tollgate::proxy::upstream::join_path;
/// assert_eq!(join_path("/", "/users?id=1"), "/users?id=1");
/// assert_eq!(join_path("/api/", "/users"), "/api/users");
/// assert_eq!(join_path("/api", "users"), "/api/users");
/// ```
pub fn join_path(base: &str, target: &str) -> String {
    // Absolute-form targets ("http://host/path") carry their own authority.
    let origin_form;
    let target = match Url::parse(target) {
        Ok(url) if url.has_host() => {
            origin_form = match url.query() {
                Some(q) => format!("{}?{q}", url.path()),
                None => url.path().to_string(),
            };
            origin_form.as_str()
        }
        _ => target,
    };

    let base = base.trim_end_matches('/');
    let target = target.trim_start_matches('/');

    format!("{base}/{target}")
}

/// Send request and receive response on a fresh connection
async fn exchange(mut stream: TcpStream, request: &Request) -> Result<Response> {
    let request_bytes = serialize_request(request);
    stream.write_all(&request_bytes).await?;
    stream.flush().await?;

    tracing::trace!("Request sent to backend");

    read_http_response(&mut stream, request.method == Method::HEAD).await
}

/// Serialize a request for the wire.
pub fn serialize_request(request: &Request) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256 + request.body.len());

    let path = if request.path.is_empty() {
        "/"
    } else {
        &request.path
    };

    buffer.extend_from_slice(
        format!("{} {} {}\r\n", request.method, path, request.version).as_bytes(),
    );

    for (key, value) in &request.headers {
        buffer.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
    }

    buffer.extend_from_slice(b"\r\n");
    buffer.extend_from_slice(&request.body);

    buffer
}

/// Read an HTTP response from a backend
pub async fn read_http_response<R>(stream: &mut R, head_request: bool) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        if let Some(headers_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            let head = buffer.split_to(headers_end + 4);
            let (status, headers) = parse_response_head(&head)?;

            // Interim responses (100 Continue, 103 Early Hints) precede the real one.
            if (100..200).contains(&status.as_u16()) && status.as_u16() != 101 {
                tracing::trace!(status = status.as_u16(), "Skipping interim response");
                continue;
            }

            let body = if head_request || status.is_bodiless() {
                Vec::new()
            } else {
                read_response_body(stream, buffer, &headers).await?
            };

            let headers = strip_hop_by_hop(headers);

            return Ok(ResponseBuilder::new(status)
                .headers(headers)
                .body(body)
                .build());
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_RESPONSE_HEAD {
            anyhow::bail!("Response headers too large");
        }

        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }
    }
}

/// Parse the status line and headers
fn parse_response_head(head: &[u8]) -> Result<(StatusCode, HashMap<String, String>)> {
    let head = std::str::from_utf8(head).context("Invalid UTF-8 in response headers")?;

    let mut lines = head.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        anyhow::bail!("Invalid status line: {status_line}");
    }

    let code: u16 = parts
        .next()
        .context("Missing status code")?
        .parse()
        .context("Invalid status code")?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok((StatusCode::from_u16(code), headers))
}

/// Read the body: exactly Content-Length bytes, or everything until EOF.
///
/// Chunked bodies are relayed undecoded, so `Transfer-Encoding` survives
/// [`strip_hop_by_hop`].
async fn read_response_body<R>(
    stream: &mut R,
    mut buffer: BytesMut,
    headers: &HashMap<String, String>,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse::<usize>().context("Invalid Content-Length"))
        .transpose()?;

    let Some(content_length) = content_length else {
        while stream.read_buf(&mut buffer).await? > 0 {}
        return Ok(buffer.to_vec());
    };

    buffer.truncate(content_length);
    while buffer.len() < content_length {
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete body received");
        }
    }
    buffer.truncate(content_length);

    Ok(buffer.to_vec())
}

fn strip_hop_by_hop(mut headers: HashMap<String, String>) -> HashMap<String, String> {
    headers.retain(|k, _| {
        k.eq_ignore_ascii_case("Transfer-Encoding")
            || !HOP_BY_HOP.iter().any(|h| k.eq_ignore_ascii_case(h))
    });
    headers
}
