use super::CacheError;
use crate::{
    rate_limit::{LimiterBackend, WindowHit},
    session::{
        cache::{session_key, SessionCache},
        CachedSessionView,
    },
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::time::Duration;
use tracing::Instrument;
use ulid::Ulid;
use uuid::Uuid;

/// Evict, insert, count and roll back in one round trip.
///
/// Returns `{allowed, count, oldest_ms}`; a rejected hit is removed before the
/// count is reported.
const SLIDING_WINDOW: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
redis.call('ZADD', key, now, member)
local count = redis.call('ZCARD', key)
local allowed = 1
if count > limit then
  redis.call('ZREM', key, member)
  allowed = 0
  count = count - 1
end
redis.call('PEXPIRE', key, window)

local oldest_ms = now
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
";

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    window: Script,
}

impl RedisCache {
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }

    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            window: Script::new(SLIDING_WINDOW),
        }
    }

    /// Round trip used by the health endpoint.
    ///
    /// # Errors
    /// Returns an error if the server does not answer.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(span("PING"))
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Protocol(format!("unexpected PING reply {reply}")))
        }
    }
}

fn span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("cache.command", db.system = "redis", db.operation = operation)
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SessionCache for RedisCache {
    async fn get(&self, session_id: Uuid) -> Result<Option<CachedSessionView>, CacheError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(session_key(session_id))
            .instrument(span("GET"))
            .await?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn put(&self, view: &CachedSessionView, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(view)?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(session_key(view.session_id), payload, ttl_seconds(ttl))
            .instrument(span("SETEX"))
            .await?;
        Ok(())
    }

    async fn remove(&self, session_ids: &[Uuid]) -> Result<(), CacheError> {
        if session_ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = session_ids.iter().copied().map(session_key).collect();
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(keys).instrument(span("DEL")).await?;
        Ok(())
    }
}

#[async_trait]
impl LimiterBackend for RedisCache {
    async fn hit_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<WindowHit, CacheError> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        // Unique member so hits in the same millisecond are all counted.
        let member = format!("{now_ms}-{}", Ulid::new());

        let mut conn = self.manager.clone();
        let (allowed, count, oldest_ms): (i64, i64, i64) = self
            .window
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .instrument(span("EVALSHA"))
            .await?;

        Ok(WindowHit {
            allowed: allowed == 1,
            count: u32::try_from(count)
                .map_err(|_| CacheError::Protocol(format!("window count {count}")))?,
            oldest_ms,
        })
    }

    async fn incr_failures(&self, key: &str, retention: Duration) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let (failures,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, i64::try_from(ttl_seconds(retention)).unwrap_or(i64::MAX))
            .ignore()
            .query_async(&mut conn)
            .instrument(span("INCR"))
            .await?;
        Ok(failures)
    }

    async fn failures(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let failures: Option<u64> = conn.get(key).instrument(span("GET")).await?;
        Ok(failures.unwrap_or(0))
    }

    async fn set_lock(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, 1, ttl_seconds(ttl))
            .instrument(span("SETEX"))
            .await?;
        Ok(())
    }

    async fn lock_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.manager.clone();
        let remaining_ms: i64 = conn.pttl(key).instrument(span("PTTL")).await?;
        // -2: no key, -1: key without expiry (never written by this crate).
        Ok(match remaining_ms {
            ms if ms > 0 => Some(Duration::from_millis(ms.unsigned_abs())),
            -1 => Some(Duration::from_secs(1)),
            _ => None,
        })
    }

    async fn clear(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(keys.to_vec())
            .instrument(span("DEL"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(900)), 900);
    }

    #[test]
    fn session_keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            session_key(id),
            "session:00000000-0000-0000-0000-000000000000"
        );
    }
}
