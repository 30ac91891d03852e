use partner_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef};

/// A credential for the partner service
///
/// Wraps an access token together with the time at which it expires. This is
/// the value handed to partner service clients and the value cached between
/// requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerCredential {
    partner_service_token: AccessToken,
    expires_at: UnixTime,
}

impl PartnerCredential {
    /// Constructs a credential from an access token and its expiry
    pub fn new(partner_service_token: AccessToken, expires_at: UnixTime) -> Self {
        Self {
            partner_service_token,
            expires_at,
        }
    }

    /// Gets the access token to present to the partner service
    #[inline]
    pub fn partner_service_token(&self) -> &AccessTokenRef {
        &self.partner_service_token
    }

    /// Gets the time that the credential will expire
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// Whether the credential has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }

    /// Whether the credential has expired according to `clock`
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the credential has expired as of `time`
    ///
    /// A credential is expired from its expiry instant onwards; there is no
    /// grace window.
    #[inline]
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        time >= self.expires_at
    }

    /// Gets a duration for how much longer the credential would be valid as of
    /// the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expires_at - time
    }
}
