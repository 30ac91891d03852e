//! Exercises the Redis store against a live instance
//!
//! Run with `REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`.

#![cfg(feature = "redis")]

use std::{sync::Arc, time::Duration};

use color_eyre::eyre::WrapErr;
use partner_tokens::{
    error::StoreError,
    protect::{KeyedDataProtector, ProtectionKey, Purposes},
    store::{CacheStore, DistributedStore},
};

async fn connect(namespace: &str, key: &ProtectionKey) -> color_eyre::Result<DistributedStore> {
    let url = std::env::var("REDIS_URL").wrap_err("REDIS_URL must point at a Redis instance")?;
    let protector = KeyedDataProtector::new(key, Purposes::default())?;
    Ok(DistributedStore::connect(&url, Some(namespace.to_owned()), Arc::new(protector)).await?)
}

async fn store(namespace: &str, key: &ProtectionKey) -> color_eyre::Result<DistributedStore> {
    let store = connect(namespace, key).await?;
    store.clear().await?;
    Ok(store)
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn values_round_trip_encrypted() -> color_eyre::Result<()> {
    let key = ProtectionKey::generate();
    let store = store("partner_tokens_test:round_trip:", &key).await?;

    store.write("k", "credential").await?;
    assert!(store.exists("k").await?);
    assert_eq!(store.read("k").await?, "credential");

    let foreign = connect("partner_tokens_test:round_trip:", &ProtectionKey::generate()).await?;
    let err = foreign.read("k").await.unwrap_err();
    assert!(matches!(err, StoreError::Protection(_)));

    store.clear().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn entries_expire_after_their_ttl() -> color_eyre::Result<()> {
    let store = store("partner_tokens_test:ttl:", &ProtectionKey::generate()).await?;

    store
        .write_with_ttl("k", "credential", Duration::from_millis(500))
        .await?;
    assert!(store.exists("k").await?);

    tokio::time::sleep(Duration::from_millis(750)).await;
    assert!(!store.exists("k").await?);
    assert!(store.read("k").await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn clear_is_bounded_by_namespace() -> color_eyre::Result<()> {
    let key = ProtectionKey::generate();
    let ours = store("partner_tokens_test:clear_a:", &key).await?;
    let theirs = store("partner_tokens_test:clear_b:", &key).await?;

    for i in 0..600 {
        ours.write(&format!("k{i}"), "v").await?;
    }
    theirs.write("k0", "v").await?;

    ours.clear().await?;

    assert!(!ours.exists("k0").await?);
    assert!(!ours.exists("k599").await?);
    assert!(theirs.exists("k0").await?);
    theirs.clear().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn delete_of_absent_key_succeeds() -> color_eyre::Result<()> {
    let store = store("partner_tokens_test:delete:", &ProtectionKey::generate()).await?;
    store.delete("never-written").await?;
    assert!(!store.exists("never-written").await?);
    Ok(())
}
