//! Ephemeral key-value backends.
//!
//! Both backends implement [`crate::session::SessionCache`] and
//! [`crate::rate_limit::LimiterBackend`]. Nothing stored here is authoritative.

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("failed to decode cached value: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected cache reply: {0}")]
    Protocol(String),
}
