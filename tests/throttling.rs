//! Sliding window, progressive lockout and failure policy.

mod common;

use anyhow::Result;
use chrono::Utc;
use common::{login_request, TestApp, PASSWORD};
use custodia::{
    cache::MemoryCache,
    error::AuthError,
    rate_limit::{FailurePolicy, RateLimitConfig, RateLimiter},
};
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn limit_plus_one_yields_exactly_one_rejection() -> Result<()> {
    let limit = 4;
    let limiter = RateLimiter::new(
        Arc::new(MemoryCache::new()),
        RateLimitConfig::new()
            .with_ip_limit(limit)
            .with_ip_window_seconds(60),
    );
    let now = Utc::now();

    let mut rejections = 0;
    for _ in 0..=limit {
        match limiter.check_ip("203.0.113.50", "/v1/auth/refresh", now).await {
            Ok(Some(status)) => assert!(status.remaining < limit),
            Ok(None) => panic!("limiter unexpectedly bypassed"),
            Err(AuthError::RateLimited(status)) => {
                assert_eq!(status.remaining, 0);
                assert!(status.retry_after.is_some());
                rejections += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    assert_eq!(rejections, 1);

    // A different route has its own window.
    assert!(limiter
        .check_ip("203.0.113.50", "/v1/auth/register", now)
        .await?
        .is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_hits_never_exceed_the_limit() -> Result<()> {
    let limit = 5;
    let limiter = RateLimiter::new(
        Arc::new(MemoryCache::new()),
        RateLimitConfig::new().with_ip_limit(limit),
    );
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check_ip("192.0.2.1", "/v1/auth/sessions", now).await
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, limit);
    Ok(())
}

#[tokio::test]
async fn lockout_escalates_and_clears_on_success() -> Result<()> {
    let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), RateLimitConfig::new());
    let email = "mallet@example.com";

    let mut locks = Vec::new();
    for failure in 1..=20u64 {
        let outcome = limiter.record_failure(email).await?;
        assert_eq!(outcome.failures, failure);
        if matches!(failure, 5 | 10 | 20) {
            locks.push(outcome.locked_for.unwrap_or_default());
        }
        if failure < 5 {
            assert!(outcome.locked_for.is_none());
        }
    }

    assert_eq!(locks.len(), 3);
    assert!(locks[0] > Duration::ZERO);
    assert!(locks.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(limiter.lock_remaining(email).await?.is_some());

    limiter.record_success(email).await?;
    assert_eq!(limiter.failures(email).await?, 0);
    assert!(limiter.lock_remaining(email).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn a_successful_login_resets_the_failure_counter() -> Result<()> {
    let app = TestApp::new()?;
    app.verified_account("judy@example.com").await?;

    for _ in 0..4 {
        assert!(matches!(
            app.service
                .login(login_request("judy@example.com", "Wr0ng!Guess"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));
    }
    assert_eq!(app.service.limiter().failures("judy@example.com").await?, 4);

    app.service
        .login(login_request("judy@example.com", PASSWORD))
        .await?;
    assert_eq!(app.service.limiter().failures("judy@example.com").await?, 0);

    // The counter starts over: four more misses still do not lock.
    for _ in 0..4 {
        let _ = app
            .service
            .login(login_request("judy@example.com", "Wr0ng!Guess"))
            .await;
    }
    app.service
        .login(login_request("judy@example.com", PASSWORD))
        .await?;
    Ok(())
}

#[tokio::test]
async fn unknown_emails_are_throttled_like_real_ones() -> Result<()> {
    let app = TestApp::new()?;

    for _ in 0..5 {
        assert!(matches!(
            app.service
                .login(login_request("ghost@example.com", PASSWORD))
                .await,
            Err(AuthError::InvalidCredentials)
        ));
    }
    assert!(matches!(
        app.service
            .login(login_request("ghost@example.com", PASSWORD))
            .await,
        Err(AuthError::LockedOut { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_cache_follows_the_failure_policy() -> Result<()> {
    let cache = Arc::new(MemoryCache::new());
    cache.set_available(false);
    let now = Utc::now();

    let open = RateLimiter::new(
        cache.clone(),
        RateLimitConfig::new().with_failure_policy(FailurePolicy::Open),
    );
    assert!(open.check_ip("10.1.1.1", "/v1/auth/refresh", now).await?.is_none());
    assert!(open
        .check_login("kim@example.com", Some("10.1.1.1"), now)
        .await?
        .is_none());

    let closed = RateLimiter::new(
        cache,
        RateLimitConfig::new().with_failure_policy(FailurePolicy::Closed),
    );
    assert!(matches!(
        closed.check_ip("10.1.1.1", "/v1/auth/refresh", now).await,
        Err(AuthError::External(_))
    ));
    Ok(())
}

#[tokio::test]
async fn disabled_limiter_lets_everything_through() -> Result<()> {
    let limiter = RateLimiter::new(
        Arc::new(MemoryCache::new()),
        RateLimitConfig::new().with_enabled(false).with_ip_limit(1),
    );
    let now = Utc::now();
    for _ in 0..5 {
        assert!(limiter.check_ip("10.2.2.2", "/v1/auth/refresh", now).await?.is_none());
    }
    Ok(())
}
