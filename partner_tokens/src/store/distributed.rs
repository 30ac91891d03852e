//! A cache store shared between instances through Redis

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::{open, seal, CacheStore};
use crate::{
    error::{ConfigurationError, StoreError},
    protect::DataProtector,
};

const DEFAULT_NAMESPACE: &str = "partner_tokens:";
const SCAN_BATCH: usize = 250;

/// A cache store backed by a shared Redis instance
///
/// The connection is established once and multiplexed by every clone of the
/// store. Expiry is enforced by Redis itself. All keys are prefixed with a
/// namespace, which bounds what [`clear`][CacheStore::clear] removes.
#[derive(Clone)]
pub struct DistributedStore {
    connection: ConnectionManager,
    namespace: Arc<str>,
    protector: Arc<dyn DataProtector>,
}

impl DistributedStore {
    /// Connects to the Redis instance at `connection`
    ///
    /// If `namespace` is `None`, keys are prefixed with `partner_tokens:`.
    pub async fn connect(
        connection: &str,
        namespace: Option<String>,
        protector: Arc<dyn DataProtector>,
    ) -> Result<Self, ConfigurationError> {
        let client = redis::Client::open(connection).map_err(|e| ConfigurationError::Invalid {
            setting: "redis_connection",
            reason: e.to_string(),
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(ConfigurationError::Connection)?;

        let namespace = namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
        tracing::info!(namespace = %namespace, "connected to distributed token cache");

        Ok(Self::from_connection(connection, namespace, protector))
    }

    /// Wraps an already established connection
    pub fn from_connection(
        connection: ConnectionManager,
        namespace: impl Into<Arc<str>>,
        protector: Arc<dyn DataProtector>,
    ) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
            protector,
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn clear_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.namespace.len() + 1);
        for c in self.namespace.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}

impl fmt::Debug for DistributedStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DistributedStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for DistributedStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        Ok(conn.exists(self.namespaced(key)).await?)
    }

    async fn read(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connection.clone();
        let stored: Option<String> = conn.get(self.namespaced(key)).await?;
        let stored = stored.ok_or(StoreError::NotFound)?;
        open(&*self.protector, &stored)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = seal(&*self.protector, value)?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.namespaced(key), value).await?;
        tracing::trace!(key, "wrote cache entry");
        Ok(())
    }

    async fn write_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return self.delete(key).await;
        }

        let value = seal(&*self.protector, value)?;
        let mut conn = self.connection.clone();
        conn.pset_ex::<_, _, ()>(self.namespaced(key), value, millis)
            .await?;
        tracing::trace!(key, ttl_ms = millis, "wrote expiring cache entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.namespaced(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let pattern = self.clear_pattern();
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(removed, namespace = %self.namespace, "cleared distributed token cache");
        Ok(())
    }
}
