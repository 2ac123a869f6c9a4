//! Per-client rate limiting
//!
//! Token buckets keyed by client identity, created lazily and evicted once
//! idle. The [`Admission`] trait is the seam the proxy handler calls through.

pub mod bucket;
pub mod identity;
pub mod limiter;

use std::future::Future;

pub use bucket::TokenBucket;
pub use identity::client_identity;
pub use limiter::{RateLimiter, spawn_cleanup};

/// Decides whether a client may send another request right now.
pub trait Admission: Send + Sync + 'static {
    fn allow(&self, client: &str) -> impl Future<Output = bool> + Send;
}

impl Admission for RateLimiter {
    async fn allow(&self, client: &str) -> bool {
        RateLimiter::allow(self, client).await
    }
}
