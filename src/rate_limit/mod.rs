//! Sliding-window throttling with progressive account lockout.
//!
//! One [`RateLimiter`] owns every throttling decision. Plain routes go through
//! [`RateLimiter::check_ip`]; login goes through [`RateLimiter::check_login`],
//! which composes the IP window, the account lock and the account window so
//! the login route is never counted twice.

pub mod policy;

pub use policy::{account_band, lock_duration, FAILURE_RETENTION, LOCK_THRESHOLD};

use crate::{cache::CacheError, error::AuthError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

pub const DEFAULT_IP_LIMIT: u32 = 60;
pub const DEFAULT_IP_WINDOW_SECONDS: u64 = 60;
pub const LOGIN_ROUTE: &str = "/login";
/// Window key for requests whose client address is unknown. They share one
/// window instead of skipping the limit.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Outcome of one atomic sliding-window hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub allowed: bool,
    /// Entries in the window after the hit (the rejected hit is not counted).
    pub count: u32,
    /// Score of the oldest entry still in the window, in unix milliseconds.
    pub oldest_ms: i64,
}

/// Cache primitives the limiter needs.
///
/// `hit_window` must be atomic per key: evict entries at or before
/// `now_ms - window`, insert the hit, count, roll the hit back when the count
/// exceeds `limit`, and refresh the key expiry to the window length.
#[async_trait]
pub trait LimiterBackend: Send + Sync {
    async fn hit_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<WindowHit, CacheError>;

    /// Increment a counter and (re)arm its expiry. Returns the new value.
    async fn incr_failures(&self, key: &str, retention: Duration) -> Result<u64, CacheError>;

    async fn failures(&self, key: &str) -> Result<u64, CacheError>;

    async fn set_lock(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remaining lock time, `None` when no lock is set.
    async fn lock_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Delete every key in one command.
    async fn clear(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// What to do when the cache behind the limiter cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the request through and log.
    Open,
    /// Reject with a dependency error.
    Closed,
}

impl FailurePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown rate limit failure mode: {other}")),
        }
    }
}

/// Values for the `X-RateLimit-*` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the window frees a slot.
    pub reset_at: i64,
    /// Set only when the request was rejected.
    pub retry_after: Option<Duration>,
}

impl RateLimitStatus {
    fn from_hit(hit: WindowHit, limit: u32, window: Duration, now_ms: i64) -> Self {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let frees_at_ms = hit.oldest_ms.saturating_add(window_ms);
        let retry_after = if hit.allowed {
            None
        } else {
            let wait_ms = u64::try_from(frees_at_ms.saturating_sub(now_ms)).unwrap_or(0);
            Some(Duration::from_secs(wait_ms.div_ceil(1000).max(1)))
        };

        Self {
            limit,
            remaining: if hit.allowed {
                limit.saturating_sub(hit.count)
            } else {
                0
            },
            reset_at: frees_at_ms.div_euclid(1000) + i64::from(frees_at_ms.rem_euclid(1000) > 0),
            retry_after,
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.retry_after.is_none()
    }
}

/// Result of recording a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failures: u64,
    pub locked_for: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    enabled: bool,
    ip_limit: u32,
    ip_window: Duration,
    failure_policy: FailurePolicy,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            ip_limit: DEFAULT_IP_LIMIT,
            ip_window: Duration::from_secs(DEFAULT_IP_WINDOW_SECONDS),
            failure_policy: FailurePolicy::Closed,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_ip_limit(mut self, limit: u32) -> Self {
        self.ip_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_ip_window_seconds(mut self, seconds: u64) -> Self {
        self.ip_window = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn ip_limit(&self) -> u32 {
        self.ip_limit
    }

    #[must_use]
    pub fn ip_window(&self) -> Duration {
        self.ip_window
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn LimiterBackend>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(backend: Arc<dyn LimiterBackend>, config: RateLimitConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn degrade<T>(&self, err: CacheError, fallback: T) -> Result<T, AuthError> {
        match self.config.failure_policy {
            FailurePolicy::Open => {
                warn!("rate limiter backend unavailable, failing open: {err}");
                Ok(fallback)
            }
            FailurePolicy::Closed => {
                error!("rate limiter backend unavailable, failing closed: {err}");
                Err(AuthError::External(format!("rate limiter unavailable: {err}")))
            }
        }
    }

    async fn window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, CacheError> {
        let now_ms = now.timestamp_millis();
        let hit = self.backend.hit_window(key, limit, window, now_ms).await?;
        Ok(RateLimitStatus::from_hit(hit, limit, window, now_ms))
    }

    /// Count one request from `ip` against `route`.
    ///
    /// Returns `Ok(None)` when limiting is disabled or bypassed by the failure
    /// policy, otherwise the header values.
    ///
    /// # Errors
    /// `RateLimited` when the window is full; `External` when the backend is
    /// down and the policy is closed.
    pub async fn check_ip(
        &self,
        ip: &str,
        route: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitStatus>, AuthError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let key = policy::ip_route_key(ip, route);
        match self
            .window(&key, self.config.ip_limit, self.config.ip_window, now)
            .await
        {
            Ok(status) if status.is_allowed() => Ok(Some(status)),
            Ok(status) => {
                debug!(ip, route, "ip window exhausted");
                Err(AuthError::RateLimited(status))
            }
            Err(err) => self.degrade(err, None),
        }
    }

    /// Fail with `LockedOut` while the account lock is set.
    ///
    /// # Errors
    /// `LockedOut` while locked, `External` when the backend is down and the
    /// policy is closed.
    pub async fn ensure_unlocked(&self, email: &str) -> Result<(), AuthError> {
        if !self.config.enabled {
            return Ok(());
        }
        match self.backend.lock_ttl(&policy::lock_key(email)).await {
            Ok(Some(retry_after)) => {
                debug!(email, ?retry_after, "account locked");
                Err(AuthError::LockedOut { retry_after })
            }
            Ok(None) => Ok(()),
            Err(err) => self.degrade(err, ()),
        }
    }

    /// Gate a login attempt before credentials are touched.
    ///
    /// Order: IP window on the login route, then the explicit account lock,
    /// then the account window sized by the current failure count.
    ///
    /// # Errors
    /// `RateLimited` for an exhausted window, `LockedOut` while the account
    /// lock is set, `External` when the backend is down and the policy is closed.
    pub async fn check_login(
        &self,
        email: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitStatus>, AuthError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let ip_status = self
            .check_ip(ip.unwrap_or(UNKNOWN_CLIENT), LOGIN_ROUTE, now)
            .await?;

        self.ensure_unlocked(email).await?;

        let failures = match self.backend.failures(&policy::failures_key(email)).await {
            Ok(failures) => failures,
            Err(err) => return self.degrade(err, ip_status),
        };
        let (limit, window) = account_band(failures);

        match self
            .window(&policy::account_window_key(email), limit, window, now)
            .await
        {
            Ok(status) if status.is_allowed() => Ok(ip_status.or(Some(status))),
            Ok(status) => {
                debug!(email, failures, "account window exhausted");
                Err(AuthError::RateLimited(status))
            }
            Err(err) => self.degrade(err, ip_status),
        }
    }

    /// Count a failed login and lock the account once the threshold is reached.
    ///
    /// # Errors
    /// Returns the backend error; callers log it and keep the original failure.
    pub async fn record_failure(&self, email: &str) -> Result<FailureOutcome, CacheError> {
        let failures = self
            .backend
            .incr_failures(&policy::failures_key(email), FAILURE_RETENTION)
            .await?;

        let locked_for = if failures >= LOCK_THRESHOLD {
            lock_duration(failures)
        } else {
            None
        };
        if let Some(ttl) = locked_for {
            self.backend.set_lock(&policy::lock_key(email), ttl).await?;
            warn!(email, failures, lock_seconds = ttl.as_secs(), "account locked after failed logins");
        }

        Ok(FailureOutcome {
            failures,
            locked_for,
        })
    }

    /// Clear the failure counter, the lock and the account window together.
    ///
    /// # Errors
    /// Returns the backend error.
    pub async fn record_success(&self, email: &str) -> Result<(), CacheError> {
        self.backend.clear(&policy::account_keys(email)).await
    }

    /// # Errors
    /// Returns the backend error.
    pub async fn failures(&self, email: &str) -> Result<u64, CacheError> {
        self.backend.failures(&policy::failures_key(email)).await
    }

    /// # Errors
    /// Returns the backend error.
    pub async fn lock_remaining(&self, email: &str) -> Result<Option<Duration>, CacheError> {
        self.backend.lock_ttl(&policy::lock_key(email)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use anyhow::Result;

    fn limiter(config: RateLimitConfig) -> (Arc<MemoryCache>, RateLimiter) {
        let cache = Arc::new(MemoryCache::new());
        (cache.clone(), RateLimiter::new(cache, config))
    }

    #[tokio::test]
    async fn window_rejects_exactly_one_over_limit() -> Result<()> {
        let (_, limiter) = limiter(RateLimitConfig::new().with_ip_limit(3));
        let now = Utc::now();

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let status = limiter.check_ip("10.0.0.1", "/register", now).await?;
            remaining.push(status.map(|status| status.remaining));
        }
        assert_eq!(remaining, vec![Some(2), Some(1), Some(0)]);

        let err = limiter.check_ip("10.0.0.1", "/register", now).await;
        match err {
            Err(AuthError::RateLimited(status)) => {
                assert_eq!(status.remaining, 0);
                assert!(status.retry_after.is_some());
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        // Another route has its own window.
        assert!(limiter.check_ip("10.0.0.1", "/refresh", now).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn window_slides() -> Result<()> {
        let (_, limiter) = limiter(
            RateLimitConfig::new()
                .with_ip_limit(1)
                .with_ip_window_seconds(10),
        );
        let start = Utc::now();
        limiter.check_ip("10.0.0.2", "/login", start).await?;
        assert!(limiter
            .check_ip("10.0.0.2", "/login", start + chrono::Duration::seconds(5))
            .await
            .is_err());
        assert!(limiter
            .check_ip("10.0.0.2", "/login", start + chrono::Duration::seconds(11))
            .await?
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn lock_is_placed_at_threshold_and_cleared_on_success() -> Result<()> {
        let (_, limiter) = limiter(RateLimitConfig::new());
        let email = "bob@example.com";

        for expected in 1..LOCK_THRESHOLD {
            let outcome = limiter.record_failure(email).await?;
            assert_eq!(outcome.failures, expected);
            assert_eq!(outcome.locked_for, None);
        }
        let outcome = limiter.record_failure(email).await?;
        assert_eq!(outcome.locked_for, Some(Duration::from_secs(900)));

        let err = limiter.check_login(email, None, Utc::now()).await;
        assert!(matches!(err, Err(AuthError::LockedOut { .. })));

        limiter.record_success(email).await?;
        assert_eq!(limiter.failures(email).await?, 0);
        assert_eq!(limiter.lock_remaining(email).await?, None);
        assert!(limiter.check_login(email, None, Utc::now()).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn login_without_client_ip_shares_one_window() -> Result<()> {
        let (_, limiter) = limiter(RateLimitConfig::new().with_ip_limit(2));
        let now = Utc::now();
        limiter.check_login("a@example.com", None, now).await?;
        limiter.check_login("b@example.com", None, now).await?;

        let err = limiter.check_login("c@example.com", None, now).await;
        assert!(matches!(err, Err(AuthError::RateLimited(_))));
        // Known addresses keep their own window.
        assert!(limiter.check_login("c@example.com", Some("10.0.0.5"), now).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn backend_outage_follows_policy() -> Result<()> {
        let (cache, open) = limiter(RateLimitConfig::new().with_failure_policy(FailurePolicy::Open));
        cache.set_available(false);
        assert_eq!(open.check_ip("10.0.0.3", "/login", Utc::now()).await?, None);
        assert_eq!(open.check_login("x@example.com", Some("10.0.0.3"), Utc::now()).await?, None);

        let (cache, closed) = limiter(RateLimitConfig::new().with_failure_policy(FailurePolicy::Closed));
        cache.set_available(false);
        let err = closed.check_ip("10.0.0.3", "/login", Utc::now()).await;
        assert!(matches!(err, Err(AuthError::External(_))));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_limiter_never_counts() -> Result<()> {
        let (_, limiter) = limiter(RateLimitConfig::new().with_enabled(false).with_ip_limit(1));
        for _ in 0..5 {
            assert_eq!(limiter.check_ip("10.0.0.4", "/login", Utc::now()).await?, None);
        }
        Ok(())
    }

    #[test]
    fn failure_policy_parses() {
        assert_eq!("OPEN".parse::<FailurePolicy>(), Ok(FailurePolicy::Open));
        assert_eq!(" closed ".parse::<FailurePolicy>(), Ok(FailurePolicy::Closed));
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
