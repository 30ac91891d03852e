//! Symmetric protection of tokens at rest
//!
//! Payloads written to a cache store are sealed with a [`DataProtector`] so that
//! anyone able to read the store, whether process memory dumps or a shared
//! distributed cache, cannot read the tokens it holds.
//!
//! The [`KeyedDataProtector`] derives a distinct AES-256-GCM key for every
//! ordered list of [`Purposes`]. A payload protected under one purpose list
//! will fail to unprotect under any other, and payloads are only portable
//! between processes that share the same [`ProtectionKey`].

use std::{fmt, str::FromStr};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{ConfigurationError, ProtectionError};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const DERIVATION_LABEL: &[u8] = b"partner_tokens/protect";

/// Protects and unprotects opaque byte sequences
pub trait DataProtector: Send + Sync {
    /// Seals `plaintext`
    ///
    /// The empty plaintext always protects to the empty payload.
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError>;

    /// Opens a payload previously produced by [`protect`][DataProtector::protect]
    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError>;
}

/// Master key material for a [`KeyedDataProtector`]
#[derive(Clone)]
pub struct ProtectionKey([u8; KEY_SIZE]);

impl ProtectionKey {
    /// Constructs a key from raw bytes
    pub const fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Generates a new random key
    ///
    /// Payloads protected under a generated key can only be read by this
    /// process, which suits the in-memory store.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Parses a key from its standard base64 encoding
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigurationError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ConfigurationError::Invalid {
                setting: "protection_key",
                reason: format!("not valid base64: {e}"),
            })?;

        let key: [u8; KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ConfigurationError::Invalid {
                    setting: "protection_key",
                    reason: format!("expected {} bytes, got {}", KEY_SIZE, bytes.len()),
                })?;

        Ok(Self(key))
    }

    /// Encodes the key as standard base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Debug for ProtectionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***PROTECTION KEY***")
    }
}

/// An ordered list of purpose strings separating protection domains
///
/// The purpose list is a stable, versioned value chosen by configuration.
/// Changing it invalidates everything previously protected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Purposes(Vec<String>);

impl Purposes {
    /// Constructs a purpose list
    pub fn new<I, S>(purposes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(purposes.into_iter().map(Into::into).collect())
    }

    /// The purposes in order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Default for Purposes {
    fn default() -> Self {
        Self::new(["partner_tokens", "token-cache", "v1"])
    }
}

impl FromStr for Purposes {
    type Err = ConfigurationError;

    /// Parses a comma-separated purpose list
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let purposes: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        if purposes.is_empty() {
            return Err(ConfigurationError::Invalid {
                setting: "protection_purposes",
                reason: "at least one purpose is required".to_owned(),
            });
        }

        Ok(Self(purposes))
    }
}

/// A data protector using AES-256-GCM under a purpose-derived key
#[derive(Clone)]
pub struct KeyedDataProtector {
    cipher: Aes256Gcm,
    purposes: Purposes,
}

impl KeyedDataProtector {
    /// Constructs a protector for the given purposes
    pub fn new(key: &ProtectionKey, purposes: Purposes) -> Result<Self, ConfigurationError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&key.0).map_err(|e| {
            ConfigurationError::Invalid {
                setting: "protection_key",
                reason: e.to_string(),
            }
        })?;

        mac.update(DERIVATION_LABEL);
        for purpose in purposes.as_slice() {
            mac.update(&(purpose.len() as u64).to_be_bytes());
            mac.update(purpose.as_bytes());
        }
        let derived = mac.finalize().into_bytes();

        let cipher =
            Aes256Gcm::new_from_slice(&derived).map_err(|e| ConfigurationError::Invalid {
                setting: "protection_key",
                reason: e.to_string(),
            })?;

        Ok(Self { cipher, purposes })
    }

    /// The purposes this protector was constructed with
    pub fn purposes(&self) -> &Purposes {
        &self.purposes
    }
}

impl fmt::Debug for KeyedDataProtector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyedDataProtector")
            .field("purposes", &self.purposes)
            .finish_non_exhaustive()
    }
}

impl DataProtector for KeyedDataProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtectionError::Seal)?;

        let mut protected = Vec::with_capacity(NONCE_SIZE + sealed.len());
        protected.extend_from_slice(&nonce);
        protected.extend_from_slice(&sealed);
        Ok(protected)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if protected.is_empty() {
            return Ok(Vec::new());
        }

        if protected.len() <= NONCE_SIZE + TAG_SIZE {
            return Err(ProtectionError::Truncated);
        }

        let (nonce, sealed) = protected.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| ProtectionError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn protector(key: &ProtectionKey, purposes: &[&str]) -> KeyedDataProtector {
        KeyedDataProtector::new(key, Purposes::new(purposes.iter().copied())).unwrap()
    }

    #[test]
    fn empty_input_protects_to_empty() {
        let p = protector(&ProtectionKey::generate(), &["a"]);
        assert!(p.protect(b"").unwrap().is_empty());
        assert!(p.unprotect(b"").unwrap().is_empty());
    }

    #[test]
    fn protected_payload_is_not_plaintext() {
        let p = protector(&ProtectionKey::generate(), &["a"]);
        let protected = p.protect(b"access-token-value").unwrap();
        assert!(!protected
            .windows(b"access-token-value".len())
            .any(|w| w == b"access-token-value"));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let p = protector(&ProtectionKey::generate(), &["a"]);
        let protected = p.protect(b"token").unwrap();
        let err = p.unprotect(&protected[..NONCE_SIZE + 3]).unwrap_err();
        assert!(matches!(err, ProtectionError::Truncated));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let p = protector(&ProtectionKey::generate(), &["a"]);
        let mut protected = p.protect(b"token").unwrap();
        let last = protected.len() - 1;
        protected[last] ^= 0x01;
        let err = p.unprotect(&protected).unwrap_err();
        assert!(matches!(err, ProtectionError::Unauthenticated));
    }

    #[test]
    fn other_key_material_is_rejected() {
        let a = protector(&ProtectionKey::generate(), &["a"]);
        let b = protector(&ProtectionKey::generate(), &["a"]);
        let protected = a.protect(b"token").unwrap();
        assert!(matches!(
            b.unprotect(&protected),
            Err(ProtectionError::Unauthenticated)
        ));
    }

    #[test]
    fn purpose_boundaries_are_significant() {
        let key = ProtectionKey::generate();
        let joined = protector(&key, &["ab", "c"]);
        let split = protector(&key, &["a", "bc"]);
        let protected = joined.protect(b"token").unwrap();
        assert!(split.unprotect(&protected).is_err());
    }

    #[test]
    fn key_round_trips_through_base64() {
        let key = ProtectionKey::generate();
        let parsed = ProtectionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed.0, key.0);
    }

    #[test]
    fn short_key_is_a_configuration_error() {
        let err = ProtectionKey::from_base64("c2hvcnQ=").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Invalid {
                setting: "protection_key",
                ..
            }
        ));
    }

    #[test]
    fn purposes_parse_from_comma_list() {
        let p: Purposes = "partner_tokens, token-cache ,v2".parse().unwrap();
        assert_eq!(p.as_slice(), ["partner_tokens", "token-cache", "v2"]);
        assert!(" , ".parse::<Purposes>().is_err());
    }

    proptest! {
        #[test]
        fn round_trips_any_non_empty_payload(
            payload in proptest::collection::vec(any::<u8>(), 1..512),
            purposes in proptest::collection::vec("[a-z0-9.]{1,12}", 0..4),
        ) {
            let key = ProtectionKey::new([7u8; KEY_SIZE]);
            let p = KeyedDataProtector::new(&key, Purposes::new(purposes)).unwrap();
            let protected = p.protect(&payload).unwrap();
            prop_assert_eq!(p.unprotect(&protected).unwrap(), payload);
        }

        #[test]
        fn different_purposes_fail_to_unprotect(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            a in proptest::collection::vec("[a-z]{1,8}", 1..3),
            b in proptest::collection::vec("[a-z]{1,8}", 1..3),
        ) {
            prop_assume!(a != b);
            let key = ProtectionKey::new([42u8; KEY_SIZE]);
            let pa = KeyedDataProtector::new(&key, Purposes::new(a)).unwrap();
            let pb = KeyedDataProtector::new(&key, Purposes::new(b)).unwrap();
            let protected = pa.protect(&payload).unwrap();
            prop_assert!(matches!(
                pb.unprotect(&protected),
                Err(ProtectionError::Unauthenticated)
            ));
        }
    }
}
