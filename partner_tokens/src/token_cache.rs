//! Persistence of an identity library's token state through a [`CacheStore`]
//!
//! Identity libraries keep acquired tokens in an in-memory cache and notify a
//! host before and after every access to it. [`TokenCacheHooks`] is the narrow
//! port for those notifications, and [`DistributedTokenCache`] implements it
//! on top of a [`CacheStore`] so that the library's state survives across
//! requests and instances.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::{
    error::{StoreError, TokenCacheError},
    principal::{CacheKey, Principal},
    store::CacheStore,
    ResourceId, ResourceIdRef,
};

/// The in-memory token state of an identity library
pub trait TokenCacheState: Send {
    /// An individual cached token
    type Item: Send + Sync;

    /// The number of tokens held
    fn len(&self) -> usize;

    /// Whether no tokens are held
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the state changed since it was last persisted
    fn has_state_changed(&self) -> bool;

    /// Records whether the state has unpersisted changes
    fn set_state_changed(&mut self, changed: bool);

    /// Serializes the whole state
    fn serialize(&self) -> Result<Vec<u8>, TokenCacheError>;

    /// Replaces the state with a previously serialized one
    fn deserialize(&mut self, blob: &[u8]) -> Result<(), TokenCacheError>;

    /// Removes every token
    fn clear(&mut self);

    /// Removes a single token
    fn delete_item(&mut self, item: &Self::Item);
}

/// Notifications raised by an identity library around accesses to its cache
#[async_trait]
pub trait TokenCacheHooks<S: TokenCacheState>: Send + Sync {
    /// Called before the library looks up a token
    async fn before_access(&self, state: &mut S) -> Result<(), TokenCacheError>;

    /// Called after the library has accessed, and possibly changed, its cache
    async fn after_access(&self, state: &mut S) -> Result<(), TokenCacheError>;
}

/// A token cache persisted to a [`CacheStore`]
///
/// The library's whole state for one resource and principal is stored as a
/// single base64 blob under [`CacheKey`]. It carries no TTL; the freshness of
/// the tokens inside is judged by the library and by the
/// [`TokenContext`][crate::TokenContext].
#[derive(Clone)]
pub struct DistributedTokenCache {
    resource: ResourceId,
    key: CacheKey,
    store: Arc<dyn CacheStore>,
}

impl DistributedTokenCache {
    /// Constructs a cache scoped to `resource` and the given principal
    pub fn new(resource: &ResourceIdRef, principal: &Principal, store: Arc<dyn CacheStore>) -> Self {
        Self {
            resource: resource.to_owned(),
            key: CacheKey::new(resource, principal.object_id()),
            store,
        }
    }

    /// The resource this cache is scoped to
    pub fn resource(&self) -> &ResourceIdRef {
        &self.resource
    }

    /// The key the library state is stored under
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Clears the library state and every entry of the backing store
    pub async fn clear<S: TokenCacheState>(&self, state: &mut S) -> Result<(), TokenCacheError> {
        state.clear();
        self.store.clear().await?;
        tracing::debug!(key = %self.key, "cleared token cache");
        Ok(())
    }

    /// Removes `item` from the library state and drops the persisted blob
    ///
    /// The blob holds the state of exactly one resource and principal, so the
    /// whole entry is removed rather than rewritten without the item.
    pub async fn delete_item<S: TokenCacheState>(
        &self,
        state: &mut S,
        item: &S::Item,
    ) -> Result<(), TokenCacheError> {
        state.delete_item(item);
        self.store.delete(self.key.as_str()).await?;
        tracing::debug!(key = %self.key, "deleted token cache item");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, TokenCacheError> {
        if !self.store.exists(self.key.as_str()).await? {
            return Ok(None);
        }

        match self.store.read(self.key.as_str()).await {
            Ok(encoded) => Ok(Some(BASE64.decode(encoded)?)),
            Err(StoreError::NotFound) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

impl fmt::Debug for DistributedTokenCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DistributedTokenCache")
            .field("resource", &self.resource)
            .field("key", &self.key)
            .field("store", &self.store)
            .finish()
    }
}

#[async_trait]
impl<S: TokenCacheState> TokenCacheHooks<S> for DistributedTokenCache {
    async fn before_access(&self, state: &mut S) -> Result<(), TokenCacheError> {
        match self.load().await? {
            Some(blob) => {
                state.deserialize(&blob)?;
                tracing::trace!(key = %self.key, entries = state.len(), "hydrated token cache");
            }
            None => {
                tracing::trace!(key = %self.key, "no persisted token cache");
            }
        }
        Ok(())
    }

    async fn after_access(&self, state: &mut S) -> Result<(), TokenCacheError> {
        if !state.has_state_changed() {
            return Ok(());
        }

        if state.is_empty() {
            self.store.delete(self.key.as_str()).await?;
            tracing::debug!(key = %self.key, "token cache emptied, removed persisted state");
        } else {
            let encoded = BASE64.encode(state.serialize()?);
            self.store.write(self.key.as_str(), &encoded).await?;
            tracing::debug!(key = %self.key, entries = state.len(), "persisted token cache");
        }

        state.set_state_changed(false);
        Ok(())
    }
}
