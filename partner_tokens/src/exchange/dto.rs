//! DTOs for interacting with the identity provider's token endpoint

use partner_clock::DurationSecs;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Grant, TokenRequest};
use crate::{AccessToken, ClientId, ClientSecret, RefreshToken, ResourceId};

/// Client credentials
#[derive(Clone, Debug, Serialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

/// The form body posted to the token endpoint
#[derive(Debug)]
pub(crate) struct TokenForm<'a>(pub(crate) &'a TokenRequest);

impl Serialize for TokenForm<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let request = self.0;
        let mut ser = serializer.serialize_struct("TokenForm", 6)?;
        ser.serialize_field("grant_type", request.grant.grant_type())?;
        ser.serialize_field("client_id", &request.client.client_id)?;
        ser.serialize_field("client_secret", &request.client.client_secret)?;
        ser.serialize_field("resource", &request.resource)?;
        match &request.grant {
            Grant::OnBehalfOf(assertion) => {
                ser.serialize_field("assertion", assertion)?;
                ser.serialize_field("requested_token_use", "on_behalf_of")?;
            }
            Grant::Password { username, password } => {
                ser.serialize_field("username", username)?;
                ser.serialize_field("password", password)?;
            }
            Grant::ClientCredentials => {}
        }
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(deserialize_with = "lenient_seconds")]
    pub expires_in: DurationSecs,
    #[serde(default)]
    pub resource: Option<ResourceId>,
}

/// Accepts `expires_in` as either a number or a numeric string
fn lenient_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<DurationSecs, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(d)? {
        Seconds::Number(n) => Ok(DurationSecs(n)),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map(DurationSecs)
            .map_err(serde::de::Error::custom),
    }
}
