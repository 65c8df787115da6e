//! Redis cache backend.

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::trace;

use super::{CacheError, TtlCache};

/// Redis backend based on the redis-rs crate.
///
/// The [`ConnectionManager`] is created lazily on first use and reconnects on
/// its own; clones of it share the same multiplexed connection.
pub struct RedisCache {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisCache {
    /// # Errors
    /// Returns an error if the connection URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("Initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl TtlCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut con = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return self.delete(key).await;
        }
        let mut con = self.connection().await?;
        let (): () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.connection().await?;
        let _removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut con).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut con = self.connection().await?;
        // PTTL answers -2 for a missing key and -1 for a key without expiry.
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut con).await?;
        Ok(u64::try_from(pttl)
            .ok()
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut con = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
