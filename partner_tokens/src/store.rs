//! Cache stores
//!
//! A [`CacheStore`] persists string values under string keys so that a token
//! acquired once can be reused by later requests and other instances. Values
//! are protected with a [`DataProtector`] and base64-encoded before they reach
//! the backend.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::{
    config::Settings,
    error::{ConfigurationError, StoreError},
    protect::DataProtector,
};

mod memory;
mod null;
#[cfg(feature = "redis")]
mod distributed;

pub use memory::InMemoryStore;
pub use null::NullStore;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub use distributed::DistributedStore;

/// Key/value persistence for cached token state
///
/// Implementations are shared by every in-flight request. Individual writes
/// are atomic upserts, but an `exists` followed by a `write` is not, and
/// concurrent writers to the same key race with the last writer winning.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Whether a live entry exists for `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reads the value stored under `key`
    ///
    /// Fails with [`StoreError::NotFound`] if the key is absent.
    async fn read(&self, key: &str) -> Result<String, StoreError>;

    /// Stores `value` under `key` with no expiry
    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Stores `value` under `key`, after which it becomes absent once `ttl`
    /// has elapsed
    async fn write_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Removes `key`, doing nothing if it is absent
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key written through this store
    async fn clear(&self) -> Result<(), StoreError>;

    /// Whether values written to this store can be read back
    fn is_persistent(&self) -> bool {
        true
    }
}

/// Selects which [`CacheStore`] backend is used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Caching disabled; every request acquires a fresh token
    #[default]
    Empty,
    /// A map held in this process
    InMemory,
    /// A shared Redis instance
    Redis,
}

impl CacheStrategy {
    /// Interprets an optional configuration value
    ///
    /// Absent or unrecognized values fall back to [`CacheStrategy::Empty`] so
    /// that a persistent backend is never chosen unless explicitly requested.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => CacheStrategy::Empty,
            Some(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    caching_strategy = v,
                    "unrecognized caching strategy, caching disabled"
                );
                CacheStrategy::Empty
            }),
        }
    }
}

/// The configured caching strategy was not recognized
#[derive(Debug, thiserror::Error)]
#[error("unrecognized caching strategy `{0}`")]
pub struct UnknownCacheStrategy(String);

impl FromStr for CacheStrategy {
    type Err = UnknownCacheStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "empty" | "none" | "null" => Ok(CacheStrategy::Empty),
            "inmemory" | "in-memory" | "memory" => Ok(CacheStrategy::InMemory),
            "redis" | "distributed" => Ok(CacheStrategy::Redis),
            _ => Err(UnknownCacheStrategy(s.to_owned())),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CacheStrategy::Empty => "Empty",
            CacheStrategy::InMemory => "InMemory",
            CacheStrategy::Redis => "Redis",
        })
    }
}

/// Constructs the store selected by `settings`
///
/// This is intended to run once at start-up; the returned store is then
/// shared by reference with every consumer.
pub async fn build_store(
    settings: &Settings,
    protector: Arc<dyn DataProtector>,
) -> Result<Arc<dyn CacheStore>, ConfigurationError> {
    let strategy = CacheStrategy::from_setting(settings.caching_strategy.as_deref());
    tracing::info!(%strategy, "configuring token cache store");

    match strategy {
        CacheStrategy::Empty => Ok(Arc::new(NullStore)),
        CacheStrategy::InMemory => Ok(Arc::new(InMemoryStore::new(protector))),
        #[cfg(feature = "redis")]
        CacheStrategy::Redis => {
            let connection = settings
                .redis_connection
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or(ConfigurationError::Missing("redis_connection"))?;
            let store =
                DistributedStore::connect(connection, settings.redis_namespace.clone(), protector)
                    .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CacheStrategy::Redis => Err(ConfigurationError::Invalid {
            setting: "caching_strategy",
            reason: "built without the `redis` feature".to_owned(),
        }),
    }
}

pub(crate) fn seal(protector: &dyn DataProtector, value: &str) -> Result<String, StoreError> {
    let protected = protector.protect(value.as_bytes())?;
    Ok(BASE64.encode(protected))
}

pub(crate) fn open(protector: &dyn DataProtector, stored: &str) -> Result<String, StoreError> {
    let protected = BASE64.decode(stored).map_err(|_| StoreError::Encoding)?;
    let plaintext = protector.unprotect(&protected)?;
    String::from_utf8(plaintext).map_err(|_| StoreError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protect::{KeyedDataProtector, ProtectionKey, Purposes};

    #[test]
    fn strategy_parses_known_values_case_insensitively() {
        assert_eq!(
            CacheStrategy::from_setting(Some("InMemory")),
            CacheStrategy::InMemory
        );
        assert_eq!(
            CacheStrategy::from_setting(Some("redis")),
            CacheStrategy::Redis
        );
        assert_eq!(
            CacheStrategy::from_setting(Some("EMPTY")),
            CacheStrategy::Empty
        );
    }

    #[test]
    fn strategy_defaults_to_empty() {
        assert_eq!(CacheStrategy::from_setting(None), CacheStrategy::Empty);
        assert_eq!(CacheStrategy::from_setting(Some("  ")), CacheStrategy::Empty);
        assert_eq!(
            CacheStrategy::from_setting(Some("memcached")),
            CacheStrategy::Empty
        );
    }

    #[test]
    fn sealed_values_open_with_the_same_protector() {
        let p = KeyedDataProtector::new(&ProtectionKey::generate(), Purposes::default()).unwrap();
        let stored = seal(&p, "{\"token\":1}").unwrap();
        assert_ne!(stored, "{\"token\":1}");
        assert_eq!(open(&p, &stored).unwrap(), "{\"token\":1}");
    }

    #[test]
    fn opening_garbage_is_an_encoding_error() {
        let p = KeyedDataProtector::new(&ProtectionKey::generate(), Purposes::default()).unwrap();
        assert!(matches!(open(&p, "%%%"), Err(StoreError::Encoding)));
    }

    fn settings(strategy: Option<&str>) -> Settings {
        Settings {
            caching_strategy: strategy.map(String::from),
            ..Settings::for_application("app", "secret")
        }
    }

    #[tokio::test]
    async fn build_store_honours_strategy() {
        let p: Arc<dyn DataProtector> = Arc::new(
            KeyedDataProtector::new(&ProtectionKey::generate(), Purposes::default()).unwrap(),
        );

        let store = build_store(&settings(Some("InMemory")), p.clone())
            .await
            .unwrap();
        store.write("k", "v").await.unwrap();
        assert!(store.exists("k").await.unwrap());

        let store = build_store(&settings(Some("bogus")), p).await.unwrap();
        store.write("k", "v").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn redis_without_connection_is_a_configuration_error() {
        let p: Arc<dyn DataProtector> = Arc::new(
            KeyedDataProtector::new(&ProtectionKey::generate(), Purposes::default()).unwrap(),
        );
        let err = build_store(&settings(Some("Redis")), p).await.unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Missing("redis_connection")
        ));
    }
}
