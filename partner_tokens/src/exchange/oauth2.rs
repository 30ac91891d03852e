//! A token exchange that uses an OAuth2 token endpoint as the authority

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use partner_clock::{Clock, System};
use tokio::sync::Mutex;

use super::{
    cache::{IdentityTokenCache, TokenCacheItem},
    dto, AuthenticationResult, TokenExchange, TokenRequest,
};
use crate::{
    error::{AuthenticationError, TokenCacheError},
    token_cache::TokenCacheHooks,
    AuthorityRef,
};

const TOKEN_PATH: &str = "oauth2/token";

/// A token exchange against an OAuth2 token endpoint
///
/// Tokens are requested from `<authority>/oauth2/token`. Without hooks, issued
/// tokens are kept in an in-process [`IdentityTokenCache`] shared by every
/// clone of this exchange. With hooks, each acquisition works on a fresh cache
/// loaded and persisted through them.
#[derive(Clone)]
pub struct OAuth2TokenExchange<C = System> {
    client: reqwest::Client,
    shared: Arc<Mutex<IdentityTokenCache>>,
    clock: C,
}

impl OAuth2TokenExchange<System> {
    /// Constructs a new exchange using `client` for requests
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            shared: Arc::new(Mutex::new(IdentityTokenCache::default())),
            clock: System,
        }
    }
}

impl<C> OAuth2TokenExchange<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> OAuth2TokenExchange<D> {
        OAuth2TokenExchange {
            client: self.client,
            shared: self.shared,
            clock,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for OAuth2TokenExchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OAuth2TokenExchange")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> OAuth2TokenExchange<C> {
    async fn acquire_with_hooks(
        &self,
        request: &TokenRequest,
        hooks: &dyn TokenCacheHooks<IdentityTokenCache>,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let mut state = IdentityTokenCache::default();
        report_hook_failure("before_access", hooks.before_access(&mut state).await);

        let result = match state.find(request, self.clock.now()) {
            Some(item) => {
                tracing::debug!(resource = %request.resource, "reusing token from persisted token cache");
                Ok(item.to_result())
            }
            None => match self.request_token(request).await {
                Ok(item) => {
                    let result = item.to_result();
                    state.insert(item, self.clock.now());
                    Ok(result)
                }
                Err(error) => Err(error),
            },
        };

        report_hook_failure("after_access", hooks.after_access(&mut state).await);
        result
    }

    async fn acquire_with_shared_cache(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let cached = self
            .shared
            .lock()
            .await
            .find(request, self.clock.now())
            .map(TokenCacheItem::to_result);

        if let Some(result) = cached {
            tracing::debug!(resource = %request.resource, "reusing token from in-process token cache");
            return Ok(result);
        }

        let item = self.request_token(request).await?;
        let result = item.to_result();
        self.shared.lock().await.insert(item, self.clock.now());
        Ok(result)
    }

    async fn request_token(
        &self,
        request: &TokenRequest,
    ) -> Result<TokenCacheItem, AuthenticationError> {
        let token_url = token_endpoint(&request.authority)?;
        request_token(&self.client, token_url, request, &self.clock).await
    }
}

#[async_trait]
impl<C> TokenExchange for OAuth2TokenExchange<C>
where
    C: Clock + fmt::Debug + Send + Sync,
{
    async fn acquire_token(
        &self,
        request: &TokenRequest,
        hooks: Option<&dyn TokenCacheHooks<IdentityTokenCache>>,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        match hooks {
            Some(hooks) => self.acquire_with_hooks(request, hooks).await,
            None => self.acquire_with_shared_cache(request).await,
        }
    }
}

fn report_hook_failure(phase: &'static str, result: Result<(), TokenCacheError>) {
    if let Err(error) = result {
        tracing::warn!(
            phase,
            error = (&error as &dyn error::Error),
            "token cache notification failed, continuing without it"
        );
    }
}

/// Resolves the token endpoint of `authority`
fn token_endpoint(authority: &AuthorityRef) -> Result<reqwest::Url, AuthenticationError> {
    let invalid = || AuthenticationError::InvalidAuthority {
        authority: authority.as_str().to_owned(),
    };

    let trimmed = authority.as_str().trim_end_matches('/');
    let endpoint = if trimmed.ends_with(TOKEN_PATH) {
        trimmed.to_owned()
    } else {
        format!("{}/{}", trimmed, TOKEN_PATH)
    };

    let url = reqwest::Url::parse(&endpoint).map_err(|_| invalid())?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(url)
}

#[tracing::instrument(
    err,
    skip(client, token_url, request, clock),
    fields(
        token_url = %token_url,
        grant_type = request.grant.grant_type(),
        client_id = %request.client.client_id,
        resource = %request.resource,
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    request: &TokenRequest,
    clock: &C,
) -> Result<TokenCacheItem, AuthenticationError> {
    tracing::trace!("requesting token from authority");

    let resp = client
        .post(token_url)
        .form(&dto::TokenForm(request))
        .send()
        .await
        .map_err(AuthenticationError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    if !status.is_success() {
        let body = resp
            .text()
            .await
            .map_err(AuthenticationError::RequestSend)?;
        return Err(AuthenticationError::Authority {
            status: status.as_u16(),
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(AuthenticationError::RequestSend)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    let issued = clock.now();
    let expires_on = issued + resp.expires_in;

    tracing::info!(
        has_refresh_token = resp.refresh_token.is_some(),
        lifetime = resp.expires_in.0,
        expiry = expires_on.0,
        "received new token"
    );

    if let Some(resource) = &resp.resource {
        if *resource != request.resource {
            tracing::debug!(issued_for = %resource, "authority issued token for a differently named resource");
        }
    }

    Ok(TokenCacheItem::new(
        request,
        resp.access_token,
        resp.refresh_token,
        expires_on,
    ))
}
