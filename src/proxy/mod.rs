//! Reverse proxy functionality
//!
//! Backend pool and balancing, active health checks, upstream forwarding
//! and the request handler that ties them to rate limiting.

pub mod backend;
pub mod handler;
pub mod health;
pub mod upstream;

pub use backend::{Backend, BackendPool, BackendState, Balancer};
pub use handler::ProxyHandler;
pub use upstream::{Forwarder, HttpForwarder};
