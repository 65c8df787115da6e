//! TTL cache used for transaction snapshots and credential tracking.
//!
//! Both consumers rely on per-key expiry only; the store is not transactional and
//! offers last-writer-wins semantics.

mod memory;
mod redis_store;

pub use memory::MemoryCache;
pub use redis_store::RedisCache;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("unsupported cache url scheme: {0}")]
    UnsupportedScheme(String),
}

#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous value and expiry.
    /// A zero `ttl` removes the key.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remaining lifetime of `key`, `None` when it is missing or already expired.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    fn backend(&self) -> &'static str;
}

/// Select a cache backend from its URL: `memory://` or `redis://` / `rediss://`.
///
/// # Errors
/// Returns an error for unknown schemes or an unparsable Redis URL.
pub fn from_url(url: &str) -> Result<Arc<dyn TtlCache>, CacheError> {
    let scheme = url.split("://").next().unwrap_or_default();
    match scheme {
        "memory" => Ok(Arc::new(MemoryCache::new())),
        "redis" | "rediss" => Ok(Arc::new(RedisCache::new(url)?)),
        other => Err(CacheError::UnsupportedScheme(other.to_string())),
    }
}
