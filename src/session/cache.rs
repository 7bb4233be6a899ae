use super::CachedSessionView;
use crate::cache::CacheError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Fast-path session projection keyed by session id. Not authoritative: it may
/// be flushed at any time without affecting correctness.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, session_id: Uuid) -> Result<Option<CachedSessionView>, CacheError>;

    async fn put(&self, view: &CachedSessionView, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, session_ids: &[Uuid]) -> Result<(), CacheError>;
}

#[must_use]
pub fn session_key(session_id: Uuid) -> String {
    format!("session:{session_id}")
}
