//! Dual-store sessions.
//!
//! The durable row is written first and decides validity. The cached view is
//! written afterwards on a best-effort basis and only accelerates lookups; a
//! cache failure is logged and never fails the caller. On a cache miss the
//! durable row is consulted and the view rebuilt.

pub mod cache;
pub mod repo;

pub use cache::SessionCache;
pub use repo::SessionRepo;

use crate::{
    error::AuthError,
    store::{AuditRecord, StoreError},
    token::AccessClaims,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Active iff not revoked and not yet expired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Denormalized projection stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSessionView {
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedSessionView {
    #[must_use]
    pub fn new(session: &Session, email: &str) -> Self {
        Self {
            session_id: session.id,
            account_id: session.account_id,
            email: email.to_string(),
            user_agent: session.user_agent.clone(),
            ip: session.ip.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

/// Client metadata recorded on a new session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepo>,
    cache: Arc<dyn SessionCache>,
    session_ttl: Duration,
    cache_ttl: Duration,
}

impl SessionStore {
    /// `cache_ttl` should mirror the access token lifetime.
    #[must_use]
    pub fn new(
        repo: Arc<dyn SessionRepo>,
        cache: Arc<dyn SessionCache>,
        session_ttl: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            cache,
            session_ttl,
            cache_ttl,
        }
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Durable insert, then best-effort cache write.
    ///
    /// # Errors
    /// Returns an error only if the durable insert fails.
    pub async fn create(
        &self,
        account_id: Uuid,
        email: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let ttl = ChronoDuration::from_std(self.session_ttl)
            .map_err(|_| AuthError::Internal("session ttl out of range".to_string()))?;
        let session = Session {
            id: Uuid::now_v7(),
            account_id,
            user_agent: client.user_agent.clone(),
            ip: client.ip.clone(),
            created_at: now,
            expires_at: now + ttl,
            revoked_at: None,
        };

        self.repo.insert(&session).await?;
        self.populate_cache(&CachedSessionView::new(&session, email), now)
            .await;

        Ok(session)
    }

    async fn populate_cache(&self, view: &CachedSessionView, now: DateTime<Utc>) {
        let remaining = (view.expires_at - now).to_std().unwrap_or_default();
        let ttl = remaining.min(self.cache_ttl);
        if ttl.is_zero() {
            return;
        }
        if let Err(err) = self.cache.put(view, ttl).await {
            warn!(session_id = %view.session_id, "session cache write failed: {err}");
        }
    }

    /// Resolve the session behind verified access token claims.
    ///
    /// A cached view naming another account is rejected outright. A miss, or an
    /// unreachable cache, falls back to the durable record and repopulates the
    /// cache when that record is still active.
    ///
    /// # Errors
    /// Returns `SessionInvalid` for unknown, revoked, expired or mismatched sessions.
    pub async fn resolve(
        &self,
        claims: &AccessClaims,
        now: DateTime<Utc>,
    ) -> Result<CachedSessionView, AuthError> {
        match self.cache.get(claims.sid).await {
            Ok(Some(view)) => {
                if view.account_id != claims.sub {
                    warn!(
                        session_id = %claims.sid,
                        "cached session belongs to a different account"
                    );
                    return Err(AuthError::SessionInvalid);
                }
                if view.expires_at <= now {
                    return Err(AuthError::SessionInvalid);
                }
                return Ok(view);
            }
            Ok(None) => {
                debug!(session_id = %claims.sid, "session cache miss");
            }
            Err(err) => {
                warn!(session_id = %claims.sid, "session cache read failed: {err}");
            }
        }

        let session = self
            .repo
            .find(claims.sid)
            .await?
            .filter(|session| session.is_active(now))
            .ok_or(AuthError::SessionInvalid)?;

        if session.account_id != claims.sub {
            return Err(AuthError::SessionInvalid);
        }

        let view = CachedSessionView::new(&session, &claims.email);
        self.populate_cache(&view, now).await;
        Ok(view)
    }

    /// Durable lookup, bypassing the cache.
    ///
    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn find_active(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .repo
            .find(session_id)
            .await?
            .filter(|session| session.is_active(now)))
    }

    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn list_active(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        self.repo.list_active(account_id, now).await
    }

    /// Revoke durably (session and its refresh tokens), then drop the cached view.
    ///
    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn revoke(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<bool, StoreError> {
        let revoked = self.repo.revoke(session_id, account_id, now, audit).await?;
        if revoked {
            self.evict(&[session_id]).await;
        }
        Ok(revoked)
    }

    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn revoke_all(
        &self,
        account_id: Uuid,
        except: Option<Uuid>,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let revoked = self.repo.revoke_all(account_id, except, now, audit).await?;
        if !revoked.is_empty() {
            self.evict(&revoked).await;
        }
        Ok(revoked)
    }

    async fn evict(&self, session_ids: &[Uuid]) {
        if let Err(err) = self.cache.remove(session_ids).await {
            warn!(count = session_ids.len(), "session cache eviction failed: {err}");
        }
    }

    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.repo.delete_expired(now).await
    }
}
