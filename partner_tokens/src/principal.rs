//! The authenticated principal on whose behalf tokens are held

use std::fmt;

use crate::{ObjectId, ObjectIdRef, ResourceIdRef, UserAssertion, UserAssertionRef};

/// The identity of the current request
///
/// Established upstream by whatever authenticates inbound requests, and passed
/// explicitly to every operation that scopes cached state to a principal.
#[derive(Clone, Debug)]
pub struct Principal {
    object_id: ObjectId,
    assertion: Option<UserAssertion>,
}

impl Principal {
    /// A principal identified by its object identifier
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            assertion: None,
        }
    }

    /// Attaches the bootstrap identity token of the signed-in session
    pub fn with_assertion(mut self, assertion: UserAssertion) -> Self {
        self.assertion = Some(assertion);
        self
    }

    /// The principal's object identifier
    #[inline]
    pub fn object_id(&self) -> &ObjectIdRef {
        &self.object_id
    }

    /// The principal's user assertion, if the session carries one
    #[inline]
    pub fn assertion(&self) -> Option<&UserAssertionRef> {
        self.assertion.as_deref()
    }
}

/// The resource tag partner service credentials are cached under
///
/// No downstream resource may use this identifier, or its cached library
/// state would share a key with the credential.
pub(crate) const PARTNER_SERVICE_TAG: &str = "PartnerCenterAPI";

/// The key under which state for a (resource, principal) pair is cached
///
/// Renders as `Resource:<resource>::UserId:<object id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Computes the key for `resource` and the principal `object_id`
    pub fn new(resource: &ResourceIdRef, object_id: &ObjectIdRef) -> Self {
        Self(format!("Resource:{}::UserId:{}", resource, object_id))
    }

    /// The key as a string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
