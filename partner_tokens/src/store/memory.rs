//! An in-process cache store

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use partner_clock::{Clock, DurationSecs, System, UnixTime};

use super::{open, seal, CacheStore};
use crate::{error::StoreError, protect::DataProtector};

#[derive(Debug)]
struct Entry {
    value: String,
    live_through: Option<UnixTime>,
}

impl Entry {
    /// The clock only resolves whole seconds, so a write seen at second `s`
    /// may have happened as late as `s + 0.999`. Keeping the entry through
    /// second `s + ttl` means it is never dropped before its TTL has elapsed.
    fn is_expired_at(&self, now: UnixTime) -> bool {
        self.live_through.map_or(false, |last| now > last)
    }
}

/// A cache store backed by a map held in this process
///
/// Clones share the same map, so a single store constructed at start-up can be
/// handed to every consumer. Entries written with a TTL become absent within a
/// second after it elapses, never before. Expired entries are dropped lazily
/// when they are next looked up, and
/// [`purge_expired`][InMemoryStore::purge_expired] sweeps the whole map.
#[derive(Clone)]
pub struct InMemoryStore<C = System> {
    entries: Arc<DashMap<String, Entry>>,
    protector: Arc<dyn DataProtector>,
    clock: C,
}

impl InMemoryStore<System> {
    /// Constructs an empty store
    pub fn new(protector: Arc<dyn DataProtector>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            protector,
            clock: System,
        }
    }
}

impl<C> InMemoryStore<C> {
    /// Sets a custom clock to be used for expiry
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> InMemoryStore<D> {
        InMemoryStore {
            entries: self.entries,
            protector: self.protector,
            clock,
        }
    }

    /// The number of entries held, including any expired entries not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Clock> InMemoryStore<C> {
    /// Drops every entry whose TTL has elapsed, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "purged expired cache entries");
        }
        purged
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired_at(now) {
                return Some(entry.value.clone());
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired_at(now))
            .is_some()
        {
            tracing::trace!(key, "dropped expired cache entry");
        }
        None
    }

    fn insert(&self, key: &str, value: &str, live_through: Option<UnixTime>) -> Result<(), StoreError> {
        let value = seal(&*self.protector, value)?;
        self.entries
            .insert(key.to_owned(), Entry { value, live_through });
        Ok(())
    }
}

fn ttl_secs(ttl: Duration) -> DurationSecs {
    let whole = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        DurationSecs(whole.saturating_add(1))
    } else {
        DurationSecs(whole)
    }
}

impl<C: fmt::Debug> fmt::Debug for InMemoryStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &self.entries.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> CacheStore for InMemoryStore<C>
where
    C: Clock + fmt::Debug + Send + Sync,
{
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key).is_some())
    }

    async fn read(&self, key: &str) -> Result<String, StoreError> {
        let stored = self.live_value(key).ok_or(StoreError::NotFound)?;
        open(&*self.protector, &stored)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, value, None)
    }

    async fn write_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let live_through = self.clock.now() + ttl_secs(ttl);
        self.insert(key, value, Some(live_through))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use partner_clock::TestClock;

    use super::*;
    use crate::protect::{KeyedDataProtector, ProtectionKey, Purposes};

    fn store() -> InMemoryStore<TestClock> {
        let protector =
            KeyedDataProtector::new(&ProtectionKey::generate(), Purposes::default()).unwrap();
        InMemoryStore::new(Arc::new(protector)).with_clock(TestClock::new(UnixTime(1_000)))
    }

    #[tokio::test]
    async fn write_read_delete() {
        let store = store();

        store.write("k", "v").await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.read("k").await.unwrap(), "v");

        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.read("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn values_are_protected_at_rest() {
        let store = store();
        store.write("k", "plain-access-token").await.unwrap();
        let raw = store.entries.get("k").unwrap().value.clone();
        assert!(!raw.contains("plain-access-token"));
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_a_no_op() {
        let store = store();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn entries_expire_once_ttl_elapses() {
        let store = store();
        store
            .write_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        store.clock.inc(60);
        assert!(store.exists("k").await.unwrap());

        store.clock.inc(1);
        assert!(!store.exists("k").await.unwrap());
        assert!(store.read("k").await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sub_second_ttl_rounds_up() {
        let store = store();
        store
            .write_with_ttl("k", "v", Duration::from_millis(1_500))
            .await
            .unwrap();

        store.clock.inc(2);
        assert!(store.exists("k").await.unwrap());
        store.clock.inc(1);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn write_late_in_a_second_is_not_dropped_early() {
        let store = store();
        store
            .write_with_ttl("k", "v", Duration::from_secs(1))
            .await
            .unwrap();

        // The next tick may be only milliseconds after the write.
        store.clock.inc(1);
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.purge_expired(), 0);

        store.clock.inc(1);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn entries_without_ttl_do_not_expire() {
        let store = store();
        store.write("k", "v").await.unwrap();
        store.clock.inc(86_400 * 365);
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn rewriting_without_ttl_clears_previous_expiry() {
        let store = store();
        store
            .write_with_ttl("k", "v1", Duration::from_secs(5))
            .await
            .unwrap();
        store.write("k", "v2").await.unwrap();
        store.clock.inc(10);
        assert_eq!(store.read("k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn purge_removes_only_expired_entries() {
        let store = store();
        store
            .write_with_ttl("short", "v", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .write_with_ttl("long", "v", Duration::from_secs(500))
            .await
            .unwrap();
        store.write("forever", "v").await.unwrap();

        store.clock.inc(10);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn clear_removes_everything_and_is_shared_by_clones() {
        let store = store();
        let other = store.clone();
        store.write("a", "1").await.unwrap();
        store.write("b", "2").await.unwrap();
        assert!(other.exists("a").await.unwrap());

        other.clear().await.unwrap();
        assert!(!store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_writers_to_one_key_leave_a_single_value() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write("shared", &format!("value-{i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.read("shared").await.unwrap();
        assert!(value.starts_with("value-"));
        assert_eq!(store.len(), 1);
    }
}
