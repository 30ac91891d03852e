//! Encrypted, pluggable caching of tokens for partner API on-behalf-of flows
//!
//! A web application that calls the partner service on behalf of its signed-in
//! users needs a fresh access token for every outbound request. Acquiring one
//! means a round trip to the identity provider, so tokens are cached at two
//! levels:
//!
//! * the identity library's own token state, persisted per resource and
//!   principal by a [`DistributedTokenCache`][token_cache::DistributedTokenCache];
//! * the issued partner service credential, cached by the [`TokenContext`] with
//!   a TTL matching its remaining lifetime.
//!
//! Both levels write to a single [`CacheStore`][store::CacheStore]. Three
//! backends are provided: nothing at all, a map held in this process, and a
//! shared Redis instance. Every value is encrypted with a
//! [`DataProtector`][protect::DataProtector] before it reaches the backend.
//!
//! # General Flow
//!
//! On application start-up, read the [`Settings`], construct the data
//! protector and the store once, and share them with a [`TokenContext`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use partner_tokens::{
//!     exchange::OAuth2TokenExchange, store, ObjectId, Principal, Settings, TokenContext,
//!     UserAssertion,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let protector = Arc::new(settings.protector()?);
//! let store = store::build_store(&settings, protector).await?;
//!
//! let exchange = Arc::new(OAuth2TokenExchange::new(reqwest::Client::new()));
//! let context = TokenContext::from_settings(&settings, store, exchange);
//!
//! let principal = Principal::new(ObjectId::from_static("00000000-0000-0000-0000-000000000001"))
//!     .with_assertion(UserAssertion::from_static("eyJ0eXAiOiJKV1Qi..."));
//!
//! let credential = context
//!     .partner_service_token("https://login.microsoftonline.com/contoso.example", &principal)
//!     .await?;
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", credential.partner_service_token()),
//!     expiry = %credential.expires_at(),
//!     "partner service credential"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `oauth2`: Provides [`OAuth2TokenExchange`][exchange::OAuth2TokenExchange], a token
//!   exchange against an OAuth2 token endpoint.
//! * `redis`: Provides [`DistributedStore`][store::DistributedStore], a cache store backed by
//!   Redis.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
mod context;
mod credential;
pub mod error;
pub mod exchange;
mod principal;
pub mod protect;
pub mod store;
pub mod token_cache;

pub use braids::*;
pub use config::Settings;
pub use context::TokenContext;
pub use credential::PartnerCredential;
pub use error::{AuthenticationError, ConfigurationError};
pub use principal::{CacheKey, Principal};
