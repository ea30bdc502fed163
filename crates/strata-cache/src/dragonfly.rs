//! `Dragonfly` (Redis-compatible) volatile cache.
//!
//! Implements [`VolatileCache`] on top of a [`fred`] client. `GETSET`
//! provides the atomic read-and-replace the ordered-value store and the
//! entity reload protocol rely on; `KEYS` provides pattern enumeration.

use async_trait::async_trait;
use fred::prelude::*;

use crate::adapter::VolatileCache;
use crate::config::Environment;
use crate::error::{CacheError, CacheResult};

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
    environment: Environment,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the URL cannot be parsed.
    /// Returns [`CacheError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, environment: Environment) -> CacheResult<Self> {
        let config = Config::from_url(url)
            .map_err(|e| CacheError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(environment = environment.as_str(), "Connected to Dragonfly");
        Ok(Self {
            client,
            environment,
        })
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl VolatileCache for DragonflyPool {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.client.get(key).await?)
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
        Ok(self.client.getset(key, value).await?)
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let _: () = self.client.set(key, value, None, None, false).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        Ok(self.client.del(key).await?)
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        Ok(self
            .client
            .custom(fred::cmd!("KEYS"), vec![pattern])
            .await?)
    }

    fn is_ready(&self) -> bool {
        self.client.is_connected()
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Refused in production.
    async fn flush(&self) -> CacheResult<()> {
        if !self.environment.allows_flush() {
            return Err(CacheError::FlushForbidden {
                environment: self.environment.as_str().to_owned(),
            });
        }
        let _: () = self.client.flushall(false).await?;
        tracing::warn!(environment = self.environment.as_str(), "Dragonfly flushed");
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.client.quit().await?;
        tracing::info!("Dragonfly connection closed");
        Ok(())
    }
}
