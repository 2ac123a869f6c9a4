//! Per-client token bucket registry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RateLimitConfig;
use crate::ratelimit::bucket::TokenBucket;

/// Maps client identities to their [`TokenBucket`].
///
/// The map sits behind one `RwLock`; each bucket carries its own lock, so
/// concurrent clients only contend on the map when a bucket is created or
/// during an eviction sweep.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    capacity: u32,
    refill_rate: u32,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            refill_rate,
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.capacity, cfg.refill_rate)
    }

    /// Admission check for one request from `client`.
    pub async fn allow(&self, client: &str) -> bool {
        self.bucket(client).await.allow().await
    }

    /// Returns the bucket for `client`, creating it on first sight.
    ///
    /// Creation re-checks under the write lock so two first requests racing
    /// for the same client end up sharing one bucket.
    async fn bucket(&self, client: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.read().await.get(client) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.capacity, self.refill_rate)));
        Arc::clone(bucket)
    }

    /// Drop every bucket idle for longer than `idle`. Returns how many went.
    pub async fn cleanup(&self, idle: Duration) -> usize {
        self.cleanup_at(Instant::now(), idle).await
    }

    pub async fn cleanup_at(&self, now: Instant, idle: Duration) -> usize {
        let mut buckets = self.buckets.write().await;

        let mut expired = Vec::new();
        for (client, bucket) in buckets.iter() {
            let last_seen = bucket.last_seen().await;
            if now.saturating_duration_since(last_seen) > idle {
                expired.push(client.clone());
            }
        }

        for client in &expired {
            buckets.remove(client);
        }

        if !expired.is_empty() {
            debug!(
                removed = expired.len(),
                remaining = buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }

        expired.len()
    }

    /// Number of tracked clients.
    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.read().await.is_empty()
    }

    pub async fn contains(&self, client: &str) -> bool {
        self.buckets.read().await.contains_key(client)
    }

    /// Tokens left for `client`, if it has a bucket.
    pub async fn tokens(&self, client: &str) -> Option<u32> {
        let bucket = self.buckets.read().await.get(client).cloned()?;
        Some(bucket.tokens().await)
    }
}

/// Runs [`RateLimiter::cleanup`] every `every` until `shutdown` flips to true.
pub fn spawn_cleanup(
    limiter: Arc<RateLimiter>,
    every: Duration,
    idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            debug!("Running rate limiter cleanup");
            limiter.cleanup(idle).await;
        }

        info!("Rate limiter cleanup stopped");
    })
}
