//! Error types

use thiserror::Error;

/// A required setting is missing or invalid
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required setting was not provided
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    /// A setting was provided but could not be used
    #[error("invalid value for setting `{setting}`: {reason}")]
    Invalid {
        /// The name of the offending setting
        setting: &'static str,
        /// Why the value was rejected
        reason: String,
    },
    /// The distributed store could not be reached while it was being set up
    #[cfg(feature = "redis")]
    #[error("unable to connect to the distributed cache")]
    Connection(#[source] redis::RedisError),
}

/// A protected payload could not be produced or opened
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// The payload is shorter than the nonce and authentication tag
    #[error("protected payload is truncated")]
    Truncated,
    /// The payload failed authentication
    ///
    /// This covers tampering as well as payloads produced under different
    /// purposes or different key material.
    #[error("protected payload could not be authenticated")]
    Unauthenticated,
    /// The plaintext could not be sealed
    #[error("unable to protect payload")]
    Seal,
}

/// A cache store operation failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key is not present
    ///
    /// Callers treat this as a cache miss.
    #[error("no entry found for key")]
    NotFound,
    /// The stored value could not be unprotected
    #[error("stored value could not be unprotected")]
    Protection(#[from] ProtectionError),
    /// The stored value was not valid base64 or UTF-8
    #[error("stored value is not correctly encoded")]
    Encoding,
    /// The backing store reported an error
    #[error("cache backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl StoreError {
    /// Whether this error represents an absent key
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// The identity library's token state could not be persisted or restored
#[derive(Debug, Error)]
pub enum TokenCacheError {
    /// The cache store failed
    #[error("token cache store error")]
    Store(#[from] StoreError),
    /// The persisted blob was not valid base64
    #[error("persisted token cache is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    /// The token state could not be serialized or deserialized
    #[error("token cache state could not be (de)serialized")]
    State(#[from] serde_json::Error),
}

/// A credential could not be acquired
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// A required parameter was empty
    #[error("required parameter `{0}` was empty")]
    MissingParameter(&'static str),
    /// The principal carries no user assertion to exchange
    #[error("the current principal has no user assertion to exchange")]
    MissingAssertion,
    /// The authority is not a usable URL
    #[error("invalid authority `{authority}`")]
    InvalidAuthority {
        /// The authority that was rejected
        authority: String,
    },
    /// The authority rejected the token request
    #[error("error requesting token from authority: {body}")]
    Authority {
        /// The HTTP status returned by the authority
        status: u16,
        /// The body of the error
        body: String,
    },
    /// The resource identifier is reserved for cached partner service
    /// credentials
    #[error("resource `{resource}` is reserved and cannot be requested")]
    ReservedResource {
        /// The resource that was rejected
        resource: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to reach the authority or read its response
    #[cfg(feature = "oauth2")]
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// A token exchange implementation failed in some other way
    #[error("token exchange failed")]
    Exchange(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
