//! Acquisition of credentials for the partner service

use std::{error, fmt, sync::Arc, time::Duration};

use partner_clock::{Clock, System};

use crate::{
    config::Settings,
    credential::PartnerCredential,
    error::{AuthenticationError, StoreError},
    exchange::{
        AuthenticationResult, ClientCredentials, Grant, IdentityTokenCache, TokenExchange,
        TokenRequest,
    },
    principal::{CacheKey, Principal, PARTNER_SERVICE_TAG},
    store::CacheStore,
    token_cache::{DistributedTokenCache, TokenCacheHooks},
    Authority, PasswordRef, ResourceId, ResourceIdRef, UsernameRef,
};

/// Hands out credentials for the partner service and other resources
///
/// Partner service credentials are cached in the [`CacheStore`] under the
/// principal's key with a TTL matching their remaining lifetime, and are only
/// reacquired once expired. Acquisition goes through the [`TokenExchange`],
/// whose own token state is persisted to the same store when the store can
/// hold it.
///
/// Concurrent requests for the same principal are not coordinated. When both
/// miss, both acquire and both write, and the last write wins.
pub struct TokenContext<C = System> {
    store: Arc<dyn CacheStore>,
    exchange: Arc<dyn TokenExchange>,
    client: Arc<ClientCredentials>,
    partner_service_resource: ResourceId,
    clock: C,
}

impl TokenContext<System> {
    /// Constructs a new context
    pub fn new(
        store: Arc<dyn CacheStore>,
        exchange: Arc<dyn TokenExchange>,
        client: ClientCredentials,
        partner_service_resource: ResourceId,
    ) -> Self {
        Self {
            store,
            exchange,
            client: Arc::new(client),
            partner_service_resource,
            clock: System,
        }
    }

    /// Constructs a context for the application identity in `settings`
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn CacheStore>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        let client = ClientCredentials {
            client_id: settings.application_id.clone(),
            client_secret: settings.application_secret.clone(),
        };
        Self::new(
            store,
            exchange,
            client,
            settings.partner_service_resource.clone(),
        )
    }
}

impl<C> TokenContext<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenContext<D> {
        TokenContext {
            store: self.store,
            exchange: self.exchange,
            client: self.client,
            partner_service_resource: self.partner_service_resource,
            clock,
        }
    }

    /// The store credentials are cached in
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenContext")
            .field("store", &self.store)
            .field("exchange", &self.exchange)
            .field("client_id", &self.client.client_id)
            .field("partner_service_resource", &self.partner_service_resource)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<C: Clock + Send + Sync> TokenContext<C> {
    /// Gets a credential for the partner service on behalf of `principal`
    ///
    /// A cached credential is returned while it has not expired. Otherwise a
    /// new token is acquired on behalf of the principal and cached until it
    /// expires.
    #[tracing::instrument(skip(self, principal), fields(object_id = %principal.object_id()))]
    pub async fn partner_service_token(
        &self,
        authority: &str,
        principal: &Principal,
    ) -> Result<PartnerCredential, AuthenticationError> {
        require("authority", authority)?;

        let key = CacheKey::new(
            ResourceIdRef::from_str(PARTNER_SERVICE_TAG),
            principal.object_id(),
        );

        if let Some(credential) = self.cached_credential(&key).await {
            if !credential.is_expired_with_clock(&self.clock) {
                tracing::debug!(%key, expiry = %credential.expires_at(), "using cached partner service credential");
                return Ok(credential);
            }
            tracing::debug!(%key, expiry = %credential.expires_at(), "cached partner service credential expired");
        }

        let result = self
            .aad_token(authority, &self.partner_service_resource, principal)
            .await?;
        let expires_at = result.expires_on();
        let credential = PartnerCredential::new(result.into_access_token(), expires_at);

        self.cache_credential(&key, &credential).await;
        Ok(credential)
    }

    /// Gets a token for `resource` on behalf of `principal`
    ///
    /// Exchanges the principal's user assertion. When the store is persistent
    /// the exchange's token state is kept in it, scoped to the resource and
    /// principal; otherwise the exchange's in-process state is used.
    pub async fn aad_token(
        &self,
        authority: &str,
        resource: &ResourceIdRef,
        principal: &Principal,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        require("authority", authority)?;
        require("resource", resource.as_str())?;
        if resource.as_str() == PARTNER_SERVICE_TAG {
            return Err(AuthenticationError::ReservedResource {
                resource: resource.as_str().to_owned(),
            });
        }
        let assertion = principal
            .assertion()
            .ok_or(AuthenticationError::MissingAssertion)?;

        let request = self.request(
            authority,
            resource,
            Grant::OnBehalfOf(assertion.to_owned()),
        );

        if self.store.is_persistent() {
            let cache = DistributedTokenCache::new(resource, principal, self.store.clone());
            let hooks: &dyn TokenCacheHooks<IdentityTokenCache> = &cache;
            self.exchange.acquire_token(&request, Some(hooks)).await
        } else {
            self.exchange.acquire_token(&request, None).await
        }
    }

    /// Gets a token for `resource` as the given user, using the app + user
    /// password grant
    pub async fn user_token(
        &self,
        authority: &str,
        resource: &ResourceIdRef,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        require("authority", authority)?;
        require("resource", resource.as_str())?;
        require("username", username.as_str())?;
        require("password", password.as_str())?;

        let grant = Grant::Password {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        self.exchange
            .acquire_token(&self.request(authority, resource, grant), None)
            .await
    }

    /// Gets a token for `resource` as the application itself
    pub async fn app_token(
        &self,
        authority: &str,
        resource: &ResourceIdRef,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        require("authority", authority)?;
        require("resource", resource.as_str())?;

        let request = self.request(authority, resource, Grant::ClientCredentials);
        self.exchange.acquire_token(&request, None).await
    }

    fn request(&self, authority: &str, resource: &ResourceIdRef, grant: Grant) -> TokenRequest {
        TokenRequest {
            authority: Authority::new(authority.to_owned()),
            resource: resource.to_owned(),
            client: self.client.clone(),
            grant,
        }
    }

    async fn cached_credential(&self, key: &CacheKey) -> Option<PartnerCredential> {
        match self.store.exists(key.as_str()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(%key, "no cached partner service credential");
                return None;
            }
            Err(error) => {
                warn_store_failure(key, "lookup", &error);
                return None;
            }
        }

        let serialized = match self.store.read(key.as_str()).await {
            Ok(serialized) => serialized,
            Err(StoreError::NotFound) => return None,
            Err(error) => {
                warn_store_failure(key, "read", &error);
                return None;
            }
        };

        match serde_json::from_str(&serialized) {
            Ok(credential) => Some(credential),
            Err(error) => {
                warn_store_failure(key, "deserialize", &error);
                None
            }
        }
    }

    async fn cache_credential(&self, key: &CacheKey, credential: &PartnerCredential) {
        let serialized = match serde_json::to_string(credential) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn_store_failure(key, "serialize", &error);
                return;
            }
        };

        let ttl = Duration::from(credential.until_expired_at(self.clock.now()));
        match self
            .store
            .write_with_ttl(key.as_str(), &serialized, ttl)
            .await
        {
            Ok(()) => {
                tracing::debug!(%key, ttl_secs = ttl.as_secs(), "cached partner service credential")
            }
            Err(error) => warn_store_failure(key, "write", &error),
        }
    }
}

fn require(name: &'static str, value: &str) -> Result<(), AuthenticationError> {
    if value.trim().is_empty() {
        Err(AuthenticationError::MissingParameter(name))
    } else {
        Ok(())
    }
}

fn warn_store_failure(key: &CacheKey, operation: &'static str, error: &(dyn error::Error + 'static)) {
    tracing::warn!(
        %key,
        operation,
        error,
        "partner service credential cache unavailable, continuing without it"
    );
}
