//! Tests for upstream request rewriting and response reading

use std::net::IpAddr;
use tollgate::http::request::{Method, RequestBuilder};
use tollgate::http::response::StatusCode;
use tollgate::proxy::backend::Backend;
use tollgate::proxy::upstream::{build_outbound_request, join_path, read_http_response, serialize_request};
use url::Url;

fn backend(url: &str) -> Backend {
    Backend::new(Url::parse(url).unwrap())
}

fn peer() -> IpAddr {
    "203.0.113.9".parse().unwrap()
}

#[test]
fn test_outbound_request_rewrites_host() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/users")
        .header("Host", "lb.example.com")
        .header("User-Agent", "Test")
        .build()
        .unwrap();

    let outbound = build_outbound_request(&request, &backend("http://localhost:3000"), peer());

    assert_eq!(outbound.header("Host"), Some("localhost:3000"));
    assert_eq!(outbound.path, "/api/users");
    assert_eq!(outbound.header("User-Agent"), Some("Test"));
    assert_eq!(outbound.header("Connection"), Some("close"));
}

#[test]
fn test_outbound_request_removes_hop_by_hop_headers() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Connection", "keep-alive, X-Session-Hint")
        .header("Keep-Alive", "timeout=5")
        .header("Upgrade", "websocket")
        .header("X-Session-Hint", "abc")
        .header("Accept", "*/*")
        .build()
        .unwrap();

    let outbound = build_outbound_request(&request, &backend("http://localhost:3000"), peer());

    assert_eq!(outbound.header("Keep-Alive"), None);
    assert_eq!(outbound.header("Upgrade"), None);
    assert_eq!(outbound.header("X-Session-Hint"), None);
    assert_eq!(outbound.header("Accept"), Some("*/*"));
    assert_eq!(outbound.header("Connection"), Some("close"));
}

#[test]
fn test_outbound_request_drops_expect() {
    let request = RequestBuilder::new()
        .method(Method::PUT)
        .path("/upload")
        .header("Expect", "100-continue")
        .header("Content-Length", "3")
        .body(b"abc".to_vec())
        .build()
        .unwrap();

    let outbound = build_outbound_request(&request, &backend("http://localhost:3000"), peer());

    assert_eq!(outbound.header("Expect"), None);
    assert_eq!(outbound.header("Content-Length"), Some("3"));
}

#[test]
fn test_outbound_request_appends_forwarded_for() {
    let fresh = RequestBuilder::new().method(Method::GET).path("/").build().unwrap();
    let chained = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("X-Forwarded-For", "198.51.100.1")
        .build()
        .unwrap();
    let b = backend("http://localhost:3000");

    assert_eq!(
        build_outbound_request(&fresh, &b, peer()).header("X-Forwarded-For"),
        Some("203.0.113.9")
    );
    assert_eq!(
        build_outbound_request(&chained, &b, peer()).header("X-Forwarded-For"),
        Some("198.51.100.1, 203.0.113.9")
    );
}

#[test]
fn test_outbound_request_keeps_body_and_method() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/api/data?v=2")
        .header("Content-Type", "application/json")
        .body(br#"{"a":1}"#.to_vec())
        .build()
        .unwrap();

    let outbound = build_outbound_request(&request, &backend("http://svc:8080/base/"), peer());

    assert_eq!(outbound.method, Method::POST);
    assert_eq!(outbound.path, "/base/api/data?v=2");
    assert_eq!(outbound.body, br#"{"a":1}"#.to_vec());
    assert_eq!(outbound.header("Content-Length"), Some("7"));
    assert_eq!(outbound.header("Host"), Some("svc:8080"));
}

#[test]
fn test_join_path() {
    assert_eq!(join_path("/", ""), "/");
    assert_eq!(join_path("/", "/a/b"), "/a/b");
    assert_eq!(join_path("/v1/", "/a"), "/v1/a");
    assert_eq!(join_path("/v1", "a?x=1"), "/v1/a?x=1");
    assert_eq!(join_path("/", "http://lb.example.com/p?q=1"), "/p?q=1");
}

#[test]
fn test_serialize_request() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("")
        .header("Host", "localhost:3000")
        .build()
        .unwrap();

    let wire = String::from_utf8(serialize_request(&request)).unwrap();

    // Empty path should default to "/"
    assert!(wire.starts_with("GET / HTTP/1.1\r\n"));
    assert!(wire.contains("Host: localhost:3000\r\n"));
    assert!(wire.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_read_response_with_content_length() {
    let mut raw: &[u8] =
        b"HTTP/1.1 201 Created\r\nContent-Length: 5\r\nConnection: close\r\nX-Id: 7\r\n\r\nhelloEXTRA";

    let response = read_http_response(&mut raw, false).await.unwrap();

    assert_eq!(response.status, StatusCode::Created);
    assert_eq!(response.body, b"hello");
    assert_eq!(response.header("X-Id"), Some("7"));
    assert_eq!(response.header("Connection"), None);
}

#[tokio::test]
async fn test_read_response_skips_interim_responses() {
    let mut raw: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a.css>\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 4\r\n\r\ndone";

    let response = read_http_response(&mut raw, false).await.unwrap();

    assert_eq!(response.status, StatusCode::Created);
    assert_eq!(response.body, b"done");
    assert_eq!(response.header("Link"), None);
}

#[tokio::test]
async fn test_read_response_until_eof() {
    let mut raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nstreamed body";

    let response = read_http_response(&mut raw, false).await.unwrap();

    assert_eq!(response.body, b"streamed body");
    assert_eq!(response.header("Content-Length"), Some("13"));
}

#[tokio::test]
async fn test_read_response_passes_unknown_status_through() {
    let mut raw: &[u8] = b"HTTP/1.1 418 I'm a teapot\r\nContent-Length: 0\r\n\r\n";

    let response = read_http_response(&mut raw, false).await.unwrap();

    assert_eq!(response.status, StatusCode::Other(418));
    assert_eq!(response.status.as_u16(), 418);
}

#[tokio::test]
async fn test_read_response_head_has_no_body() {
    let mut raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n";

    let response = read_http_response(&mut raw, true).await.unwrap();

    assert!(response.body.is_empty());
    assert_eq!(response.header("Content-Length"), Some("512"));
}

#[tokio::test]
async fn test_read_response_truncated_body_is_error() {
    let mut raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";

    assert!(read_http_response(&mut raw, false).await.is_err());
}

#[tokio::test]
async fn test_read_response_garbage_is_error() {
    let mut raw: &[u8] = b"SSH-2.0-OpenSSH_9.0\r\n\r\n";

    assert!(read_http_response(&mut raw, false).await.is_err());
}
