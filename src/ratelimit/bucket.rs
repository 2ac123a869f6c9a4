//! Token bucket
//!
//! One bucket per client. Refill is lazy: tokens are topped up when the
//! bucket is consulted, never by a timer.

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-client admission budget.
///
/// Holds between `0` and `capacity` tokens. Each admitted request spends
/// one token; `refill_rate` tokens come back per elapsed second.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    capacity: u32,
    tokens: u32,
    refill_rate: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl BucketState {
    /// Adds whole tokens for the time since the last refill.
    ///
    /// Fractions of a token are discarded together with the elapsed time
    /// that produced them, so a bucket polled more often than once per
    /// token interval refills more slowly than the nominal rate.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let to_add = (elapsed * f64::from(self.refill_rate)).floor() as u64;

        if to_add > 0 {
            let topped = u64::from(self.tokens).saturating_add(to_add);
            self.tokens = topped.min(u64::from(self.capacity)) as u32;
            self.last_refill = now;
        }
    }
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_rate: u32, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState {
                capacity,
                tokens: capacity,
                refill_rate,
                last_refill: now,
                last_seen: now,
            }),
        }
    }

    /// Try to spend one token.
    pub async fn allow(&self) -> bool {
        self.allow_at(Instant::now()).await
    }

    /// Like [`TokenBucket::allow`] with an explicit clock reading.
    ///
    /// `last_seen` moves forward even when the request is denied, so idle
    /// eviction tracks attempts rather than successes.
    pub async fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().await;

        state.refill(now);
        state.last_seen = now;

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently held, without refilling.
    pub async fn tokens(&self) -> u32 {
        self.state.lock().await.tokens
    }

    pub async fn capacity(&self) -> u32 {
        self.state.lock().await.capacity
    }

    /// Time of the most recent admission attempt.
    pub async fn last_seen(&self) -> Instant {
        self.state.lock().await.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn capacity_then_deny_then_one_per_second() {
        let bucket = TokenBucket::new(5, 1);

        for i in 0..5 {
            assert!(bucket.allow().await, "request {} should be admitted", i + 1);
        }
        assert!(!bucket.allow().await);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_refill_is_dropped() {
        let bucket = TokenBucket::new(1, 1);
        assert!(bucket.allow().await);

        // 0.6s: nothing to add, and last_refill does not move.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!bucket.allow().await);

        // 1.2s since the last refill: one whole token.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(bucket.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(3, 100);
        assert!(bucket.allow().await);

        tokio::time::advance(Duration::from_secs(3600)).await;
        bucket.allow().await;

        assert_eq!(bucket.tokens().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_still_updates_last_seen() {
        let bucket = TokenBucket::new(0, 0);
        let created = bucket.last_seen().await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!bucket.allow().await);

        assert_eq!(bucket.last_seen().await, created + Duration::from_secs(30));
    }
}
