//! Token acquisition from the identity provider
//!
//! The identity provider is an external collaborator. This module defines the
//! boundary the rest of the crate relies on, [`TokenExchange`], together with
//! the identity library's own in-memory token state, [`IdentityTokenCache`],
//! whose persistence is delegated to [`TokenCacheHooks`].

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use partner_clock::UnixTime;

use crate::{
    error::AuthenticationError, token_cache::TokenCacheHooks, AccessToken, AccessTokenRef,
    Authority, Password, ResourceId, ResourceIdRef, UserAssertion, Username,
};

mod cache;
pub mod dto;
#[cfg(feature = "oauth2")]
mod oauth2;

pub use cache::{IdentityTokenCache, TokenCacheItem};
pub use dto::ClientCredentials;
#[cfg(feature = "oauth2")]
#[cfg_attr(docsrs, doc(cfg(feature = "oauth2")))]
pub use oauth2::OAuth2TokenExchange;

/// The grant presented to the identity provider
#[derive(Clone, Debug)]
pub enum Grant {
    /// Exchange the signed-in user's assertion for a token to a downstream
    /// resource (on-behalf-of)
    OnBehalfOf(UserAssertion),
    /// Resource owner password credentials (app + user)
    Password {
        /// The user name
        username: Username,
        /// The user's password
        password: Password,
    },
    /// The application's own identity (app only)
    ClientCredentials,
}

impl Grant {
    /// The OAuth2 `grant_type` for this grant
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::OnBehalfOf(_) => "urn:ietf:params:oauth:grant-type:jwt-bearer",
            Grant::Password { .. } => "password",
            Grant::ClientCredentials => "client_credentials",
        }
    }
}

/// A request for a token to `resource`
#[derive(Clone, Debug)]
pub struct TokenRequest {
    /// The authority to request the token from
    pub authority: Authority,
    /// The resource the token should grant access to
    pub resource: ResourceId,
    /// The identity of this application
    pub client: Arc<ClientCredentials>,
    /// The grant being exchanged
    pub grant: Grant,
}

/// A token issued by the identity provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationResult {
    access_token: AccessToken,
    expires_on: UnixTime,
    resource: ResourceId,
}

impl AuthenticationResult {
    /// Constructs a result from its parts
    pub fn new(access_token: AccessToken, expires_on: UnixTime, resource: ResourceId) -> Self {
        Self {
            access_token,
            expires_on,
            resource,
        }
    }

    /// The issued access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The time at which the access token expires
    #[inline]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// The resource the access token was issued for
    #[inline]
    pub fn resource(&self) -> &ResourceIdRef {
        &self.resource
    }

    pub(crate) fn into_access_token(self) -> AccessToken {
        self.access_token
    }
}

/// A client of the identity provider
///
/// When `hooks` are supplied, the implementation must load its token state
/// through them before looking up a token and report back after any access,
/// so that state can be shared outside this process.
#[async_trait]
pub trait TokenExchange: Send + Sync + fmt::Debug {
    /// Acquires a token for `request`, reusing a cached one if still usable
    async fn acquire_token(
        &self,
        request: &TokenRequest,
        hooks: Option<&dyn TokenCacheHooks<IdentityTokenCache>>,
    ) -> Result<AuthenticationResult, AuthenticationError>;
}
