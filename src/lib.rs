//! Tollgate - rate limited round-robin load balancer
//!
//! Core library: HTTP transport, backend pool with health checks, per-client
//! token bucket rate limiting and the proxy handler tying them together.

pub mod config;
pub mod http;
pub mod proxy;
pub mod ratelimit;
pub mod server;
