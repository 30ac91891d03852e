use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use partner_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{AuthenticationResult, Grant, TokenRequest};
use crate::{
    error::TokenCacheError, token_cache::TokenCacheState, AccessToken, Authority, ClientId,
    RefreshToken, ResourceId,
};

/// Tokens this close to expiry are not handed out again
pub(crate) const EXPIRY_MARGIN: DurationSecs = DurationSecs(60);

/// A token held by the identity library
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheItem {
    authority: Authority,
    resource: ResourceId,
    client_id: ClientId,
    subject: String,
    access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    expires_on: UnixTime,
}

impl TokenCacheItem {
    pub(crate) fn new(
        request: &TokenRequest,
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expires_on: UnixTime,
    ) -> Self {
        Self {
            authority: request.authority.clone(),
            resource: request.resource.clone(),
            client_id: request.client.client_id.clone(),
            subject: subject_of(&request.grant),
            access_token,
            refresh_token,
            expires_on,
        }
    }

    /// The time at which the cached access token expires
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// Whether this item may be handed out as of `now`
    ///
    /// Items within one minute of expiry are treated as already expired, to
    /// absorb clock skew between this host and the resource.
    pub fn is_usable_at(&self, now: UnixTime) -> bool {
        now + EXPIRY_MARGIN < self.expires_on
    }

    fn matches(&self, request: &TokenRequest, subject: &str) -> bool {
        self.authority == request.authority
            && self.resource == request.resource
            && self.client_id == request.client.client_id
            && self.subject == subject
    }

    pub(crate) fn to_result(&self) -> AuthenticationResult {
        AuthenticationResult::new(
            self.access_token.clone(),
            self.expires_on,
            self.resource.clone(),
        )
    }
}

/// Identifies who a token was issued to without retaining the credential
fn subject_of(grant: &Grant) -> String {
    match grant {
        Grant::OnBehalfOf(assertion) => {
            let digest = Sha256::digest(assertion.as_str().as_bytes());
            format!("assertion:{}", URL_SAFE_NO_PAD.encode(digest))
        }
        Grant::Password { username, .. } => format!("user:{}", username.as_str()),
        Grant::ClientCredentials => "app".to_owned(),
    }
}

/// The identity library's in-memory token state
#[derive(Debug, Default)]
pub struct IdentityTokenCache {
    items: Vec<TokenCacheItem>,
    changed: bool,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    items: Vec<TokenCacheItem>,
}

impl IdentityTokenCache {
    /// Finds a token for `request` that is still usable as of `now`
    pub fn find(&self, request: &TokenRequest, now: UnixTime) -> Option<&TokenCacheItem> {
        let subject = subject_of(&request.grant);
        self.items
            .iter()
            .find(|item| item.matches(request, &subject))
            .filter(|item| item.is_usable_at(now))
    }

    /// Stores `item`, replacing any token issued for the same request and
    /// dropping every token that has expired as of `now`
    pub fn insert(&mut self, item: TokenCacheItem, now: UnixTime) {
        self.remove_expired(now);
        self.items.retain(|existing| {
            !(existing.authority == item.authority
                && existing.resource == item.resource
                && existing.client_id == item.client_id
                && existing.subject == item.subject)
        });
        self.items.push(item);
        self.changed = true;
    }

    /// Drops every token that has expired as of `now`, returning how many
    /// were removed
    pub fn remove_expired(&mut self, now: UnixTime) -> usize {
        let before = self.items.len();
        self.items.retain(|item| now < item.expires_on);
        let removed = before - self.items.len();
        if removed > 0 {
            self.changed = true;
            tracing::trace!(removed, "dropped expired tokens from token cache");
        }
        removed
    }

    /// The tokens currently held
    pub fn items(&self) -> &[TokenCacheItem] {
        &self.items
    }
}

impl TokenCacheState for IdentityTokenCache {
    type Item = TokenCacheItem;

    fn len(&self) -> usize {
        self.items.len()
    }

    fn has_state_changed(&self) -> bool {
        self.changed
    }

    fn set_state_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    fn serialize(&self) -> Result<Vec<u8>, TokenCacheError> {
        Ok(serde_json::to_vec(&PersistedState {
            items: self.items.clone(),
        })?)
    }

    fn deserialize(&mut self, blob: &[u8]) -> Result<(), TokenCacheError> {
        let state: PersistedState = serde_json::from_slice(blob)?;
        self.items = state.items;
        Ok(())
    }

    fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.changed = true;
        }
    }

    fn delete_item(&mut self, item: &TokenCacheItem) {
        let before = self.items.len();
        self.items.retain(|existing| existing != item);
        if self.items.len() != before {
            self.changed = true;
        }
    }
}
