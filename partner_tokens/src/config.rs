//! Application settings

use std::env;

use serde::{Deserialize, Deserializer};

use crate::{
    error::ConfigurationError,
    principal::PARTNER_SERVICE_TAG,
    protect::{KeyedDataProtector, ProtectionKey, Purposes},
    store::CacheStrategy,
    ClientId, ClientSecret, ResourceId,
};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const DEFAULT_PARTNER_SERVICE_RESOURCE: &str = "https://api.partnercenter.microsoft.com";

/// Settings for the token cache and the application identity
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// The application (client) ID
    pub application_id: ClientId,

    /// The application secret
    pub application_secret: ClientSecret,

    /// The identity provider authority
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Which cache store to use; see [`CacheStrategy`]
    #[serde(default)]
    pub caching_strategy: Option<String>,

    /// Connection string for the distributed store
    #[serde(default)]
    pub redis_connection: Option<String>,

    /// Prefix applied to every key in the distributed store
    #[serde(default)]
    pub redis_namespace: Option<String>,

    /// Base64-encoded 256-bit key used to protect cached values
    #[serde(default, deserialize_with = "deserialize_key")]
    pub protection_key: Option<ProtectionKey>,

    /// Comma-separated purpose list used to protect cached values
    #[serde(default)]
    pub protection_purposes: Option<String>,

    /// The resource identifier of the partner service
    #[serde(default = "default_partner_service_resource")]
    pub partner_service_resource: ResourceId,
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_owned()
}

fn default_partner_service_resource() -> ResourceId {
    ResourceId::from_static(DEFAULT_PARTNER_SERVICE_RESOURCE)
}

fn deserialize_key<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ProtectionKey>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|s| ProtectionKey::from_base64(&s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

impl Settings {
    /// Settings for an application with every optional value defaulted
    pub fn for_application(
        application_id: impl Into<String>,
        application_secret: impl Into<String>,
    ) -> Self {
        Self {
            application_id: ClientId::new(application_id.into()),
            application_secret: ClientSecret::new(application_secret.into()),
            authority: default_authority(),
            caching_strategy: None,
            redis_connection: None,
            redis_namespace: None,
            protection_key: None,
            protection_purposes: None,
            partner_service_resource: default_partner_service_resource(),
        }
    }

    /// Loads settings from `PARTNER_*` environment variables
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `PARTNER_APPLICATION_ID` | `application_id` (required) |
    /// | `PARTNER_APPLICATION_SECRET` | `application_secret` (required) |
    /// | `PARTNER_AUTHORITY` | `authority` |
    /// | `PARTNER_CACHING_STRATEGY` | `caching_strategy` |
    /// | `PARTNER_REDIS_CONNECTION` | `redis_connection` |
    /// | `PARTNER_REDIS_NAMESPACE` | `redis_namespace` |
    /// | `PARTNER_PROTECTION_KEY` | `protection_key` |
    /// | `PARTNER_PROTECTION_PURPOSES` | `protection_purposes` |
    /// | `PARTNER_SERVICE_RESOURCE` | `partner_service_resource` |
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads settings using `lookup` to resolve each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let application_id =
            get("PARTNER_APPLICATION_ID").ok_or(ConfigurationError::Missing("application_id"))?;
        let application_secret = get("PARTNER_APPLICATION_SECRET")
            .ok_or(ConfigurationError::Missing("application_secret"))?;

        let mut settings = Self::for_application(application_id, application_secret);

        if let Some(authority) = get("PARTNER_AUTHORITY") {
            settings.authority = authority;
        }
        if let Some(resource) = get("PARTNER_SERVICE_RESOURCE") {
            if resource.trim() == PARTNER_SERVICE_TAG {
                return Err(ConfigurationError::Invalid {
                    setting: "partner_service_resource",
                    reason: format!("`{PARTNER_SERVICE_TAG}` is reserved for cached credentials"),
                });
            }
            settings.partner_service_resource = ResourceId::new(resource);
        }
        settings.caching_strategy = get("PARTNER_CACHING_STRATEGY");
        settings.redis_connection = get("PARTNER_REDIS_CONNECTION");
        settings.redis_namespace = get("PARTNER_REDIS_NAMESPACE");
        settings.protection_purposes = get("PARTNER_PROTECTION_PURPOSES");
        settings.protection_key = get("PARTNER_PROTECTION_KEY")
            .map(|k| ProtectionKey::from_base64(&k))
            .transpose()?;

        Ok(settings)
    }

    /// The authority that issues tokens for `tenant`
    ///
    /// Appends the tenant to the configured authority,
    /// e.g. `https://login.microsoftonline.com/contoso.example`.
    pub fn tenant_authority(&self, tenant: &str) -> String {
        format!(
            "{}/{}",
            self.authority.trim_end_matches('/'),
            tenant.trim_matches('/')
        )
    }

    /// The configured cache strategy
    pub fn cache_strategy(&self) -> CacheStrategy {
        CacheStrategy::from_setting(self.caching_strategy.as_deref())
    }

    /// The configured purpose list, or the default purposes
    pub fn purposes(&self) -> Result<Purposes, ConfigurationError> {
        match &self.protection_purposes {
            Some(p) => p.parse(),
            None => Ok(Purposes::default()),
        }
    }

    /// Constructs the data protector for cached values
    ///
    /// A shared store must be protected under a configured key so that every
    /// instance can read what the others wrote. Other strategies fall back to
    /// a key generated for this process.
    pub fn protector(&self) -> Result<KeyedDataProtector, ConfigurationError> {
        let key = match (&self.protection_key, self.cache_strategy()) {
            (Some(key), _) => key.clone(),
            (None, CacheStrategy::Redis) => {
                return Err(ConfigurationError::Missing("protection_key"));
            }
            (None, _) => ProtectionKey::generate(),
        };

        KeyedDataProtector::new(&key, self.purposes()?)
    }
}
