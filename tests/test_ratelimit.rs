//! Tests for the per-client rate limiter

use std::sync::Arc;
use std::time::Duration;
use tollgate::ratelimit::{Admission, RateLimiter, TokenBucket};

#[tokio::test]
async fn test_requests_within_capacity_allowed() {
    let limiter = RateLimiter::new(3, 0);

    for i in 0..3 {
        assert!(limiter.allow("192.168.1.1").await, "request {} should pass", i + 1);
    }
    assert!(!limiter.allow("192.168.1.1").await);
}

#[tokio::test]
async fn test_different_clients_independent() {
    let limiter = RateLimiter::new(1, 0);

    assert!(limiter.allow("192.168.1.1").await);
    assert!(!limiter.allow("192.168.1.1").await);

    assert!(limiter.allow("2001:db8::1").await);
    assert_eq!(limiter.len().await, 2);
}

#[tokio::test]
async fn test_buckets_created_lazily() {
    let limiter = RateLimiter::new(5, 1);
    assert!(limiter.is_empty().await);
    assert_eq!(limiter.tokens("10.0.0.1").await, None);

    limiter.allow("10.0.0.1").await;

    assert!(limiter.contains("10.0.0.1").await);
    assert_eq!(limiter.tokens("10.0.0.1").await, Some(4));
}

#[tokio::test]
async fn test_admission_trait_delegates() {
    async fn check<A: Admission>(a: &A, client: &str) -> bool {
        a.allow(client).await
    }

    let limiter = RateLimiter::new(1, 0);
    assert!(check(&limiter, "c").await);
    assert!(!check(&limiter, "c").await);
}

#[tokio::test(start_paused = true)]
async fn test_refill_restores_one_token_per_second() {
    let limiter = RateLimiter::new(5, 1);

    for _ in 0..5 {
        assert!(limiter.allow("client").await);
    }
    assert!(!limiter.allow("client").await);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(limiter.allow("client").await);
    assert!(!limiter.allow("client").await);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_removes_only_idle_buckets() {
    let limiter = RateLimiter::new(2, 0);

    // Tokens to spare, but idle.
    limiter.allow("idle-full").await;

    // Drained, but still active.
    tokio::time::advance(Duration::from_secs(299)).await;
    limiter.allow("active").await;
    limiter.allow("active").await;
    limiter.allow("active").await;

    tokio::time::advance(Duration::from_secs(2)).await;
    let removed = limiter.cleanup(Duration::from_secs(300)).await;

    assert_eq!(removed, 1);
    assert!(!limiter.contains("idle-full").await);
    assert_eq!(limiter.tokens("active").await, Some(0));
    assert!(limiter.contains("active").await);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_keeps_bucket_at_exact_threshold() {
    let limiter = RateLimiter::new(1, 1);
    limiter.allow("edge").await;

    tokio::time::advance(Duration::from_secs(300)).await;

    assert_eq!(limiter.cleanup(Duration::from_secs(300)).await, 0);
    assert!(limiter.contains("edge").await);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_client_starts_with_fresh_bucket() {
    let limiter = RateLimiter::new(1, 0);
    assert!(limiter.allow("churn").await);
    assert!(!limiter.allow("churn").await);

    tokio::time::advance(Duration::from_secs(10)).await;
    limiter.cleanup(Duration::from_secs(5)).await;

    assert!(limiter.allow("churn").await);
}

#[tokio::test]
async fn test_concurrent_clients_share_limiter() {
    let limiter = Arc::new(RateLimiter::new(50, 0));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.allow("hot").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 50);
}

#[tokio::test(start_paused = true)]
async fn test_tokens_stay_within_bounds_under_mixed_timing() {
    let bucket = TokenBucket::new(4, 3);
    let steps_ms = [0u64, 10, 900, 0, 5000, 333, 334, 333, 1, 0, 2500, 70];

    for step in steps_ms {
        tokio::time::advance(Duration::from_millis(step)).await;
        bucket.allow().await;
        let tokens = bucket.tokens().await;
        assert!(tokens <= bucket.capacity().await);
    }
}
