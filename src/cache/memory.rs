//! In-process cache for tests and single-node runs.

use super::CacheError;
use crate::{
    rate_limit::{LimiterBackend, WindowHit},
    session::{cache::SessionCache, CachedSessionView},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

#[derive(Default)]
struct State {
    windows: HashMap<String, VecDeque<i64>>,
    counters: HashMap<String, (u64, Instant)>,
    locks: HashMap<String, Instant>,
    sessions: HashMap<Uuid, (CachedSessionView, Instant)>,
}

pub struct MemoryCache {
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop everything, as a cache flush would.
    pub async fn flush(&self) {
        *self.state.lock().await = State::default();
    }

    /// Live cached session ids.
    pub async fn session_ids(&self) -> Vec<Uuid> {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .sessions
            .iter()
            .filter(|(_, (_, expires))| *expires > now)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Overwrite a cached view directly, bypassing the session store.
    pub async fn insert_session(&self, view: CachedSessionView, ttl: Duration) {
        self.state
            .lock()
            .await
            .sessions
            .insert(view.session_id, (view, Instant::now() + ttl));
    }

    /// Counterpart of `RedisCache::ping`.
    ///
    /// # Errors
    /// Fails while the cache is marked unavailable.
    pub fn ping(&self) -> Result<(), CacheError> {
        self.ensure_available()
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Protocol("cache unavailable".to_string()))
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, session_id: Uuid) -> Result<Option<CachedSessionView>, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        match state.sessions.get(&session_id) {
            Some((view, expires)) if *expires > Instant::now() => Ok(Some(view.clone())),
            Some(_) => {
                state.sessions.remove(&session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, view: &CachedSessionView, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.state
            .lock()
            .await
            .sessions
            .insert(view.session_id, (view.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, session_ids: &[Uuid]) -> Result<(), CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        for id in session_ids {
            state.sessions.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl LimiterBackend for MemoryCache {
    async fn hit_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<WindowHit, CacheError> {
        self.ensure_available()?;
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut state = self.state.lock().await;
        let entries = state.windows.entry(key.to_string()).or_default();
        while entries.front().is_some_and(|score| *score <= cutoff) {
            entries.pop_front();
        }

        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        let allowed = count < limit;
        if allowed {
            // Scores stay ordered because callers pass a monotonic clock.
            let position = entries.partition_point(|score| *score <= now_ms);
            entries.insert(position, now_ms);
        }

        Ok(WindowHit {
            allowed,
            count: if allowed { count + 1 } else { count },
            oldest_ms: entries.front().copied().unwrap_or(now_ms),
        })
    }

    async fn incr_failures(&self, key: &str, retention: Duration) -> Result<u64, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let entry = state
            .counters
            .entry(key.to_string())
            .or_insert((0, now + retention));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now + retention;
        Ok(entry.0)
    }

    async fn failures(&self, key: &str) -> Result<u64, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .state
            .lock()
            .await
            .counters
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map_or(0, |(value, _)| *value))
    }

    async fn set_lock(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.state
            .lock()
            .await
            .locks
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn lock_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .state
            .lock()
            .await
            .locks
            .get(key)
            .filter(|expires| **expires > now)
            .map(|expires| *expires - now))
    }

    async fn clear(&self, keys: &[String]) -> Result<(), CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        for key in keys {
            state.windows.remove(key);
            state.counters.remove(key);
            state.locks.remove(key);
        }
        Ok(())
    }
}
