//! A cache store that stores nothing

use std::time::Duration;

use async_trait::async_trait;

use super::CacheStore;
use crate::error::StoreError;

/// A cache store that discards every write
///
/// Used when caching is disabled. Every probe misses, so every request
/// performs a fresh acquisition, but callers need no separate code path.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

#[async_trait]
impl CacheStore for NullStore {
    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn read(&self, _key: &str) -> Result<String, StoreError> {
        Ok(String::new())
    }

    async fn write(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn write_with_ttl(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Clone, Debug)]
    enum Op {
        Write(String, String),
        WriteTtl(String, String, u64),
        Delete(String),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        let key = "[a-z:]{1,16}";
        prop_oneof![
            (key, ".*").prop_map(|(k, v)| Op::Write(k, v)),
            (key, ".*", 0u64..10_000).prop_map(|(k, v, t)| Op::WriteTtl(k, v, t)),
            key.prop_map(Op::Delete),
            Just(Op::Clear),
        ]
    }

    #[tokio::test]
    async fn reads_return_empty() {
        assert_eq!(NullStore.read("anything").await.unwrap(), "");
        assert!(!NullStore.is_persistent());
    }

    proptest! {
        #[test]
        fn nothing_ever_exists(ops in proptest::collection::vec(op(), 0..32), key in "[a-z:]{1,16}") {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = NullStore;
                for op in &ops {
                    match op {
                        Op::Write(k, v) => store.write(k, v).await.unwrap(),
                        Op::WriteTtl(k, v, t) => store
                            .write_with_ttl(k, v, Duration::from_secs(*t))
                            .await
                            .unwrap(),
                        Op::Delete(k) => store.delete(k).await.unwrap(),
                        Op::Clear => store.clear().await.unwrap(),
                    }
                    if let Op::Write(k, _) | Op::WriteTtl(k, _, _) = op {
                        assert!(!store.exists(k).await.unwrap());
                    }
                }
                assert!(!store.exists(&key).await.unwrap());
            });
        }
    }
}
