use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, $default)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The application (client) ID registered with the identity provider
#[braid(serde)]
pub struct ClientId;

/// The application secret used to identify the client to the identity provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// The identity token of the signed-in user, presented as the assertion of an
/// on-behalf-of exchange
#[braid(serde, debug = "owned", display = "owned")]
pub struct UserAssertion;

limited_reveal!(UserAssertionRef: "USER ASSERTION", 15);

/// The user name presented in a resource owner password grant
#[braid(serde)]
pub struct Username;

/// The password presented in a resource owner password grant
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 1);

/// Identifier of a downstream API a token grants access to
#[braid(serde)]
pub struct ResourceId;

/// The object identifier of an authenticated principal
#[braid(serde)]
pub struct ObjectId;

/// The identity provider authority, e.g. `https://login.microsoftonline.com/<tenant>`
#[braid(serde)]
pub struct Authority;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let token = AccessToken::from_static("eyJ0eXAiOiJKV1QiLCJhbGciOi");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_bounded_prefix() {
        let secret = ClientSecret::from_static("super-secret-value");
        assert_eq!(format!("{:#?}", secret), "\"supe…\"");
        assert_eq!(format!("{:#8?}", secret), "\"super-s…\"");
    }

    #[test]
    fn alternate_display_reveals_a_bounded_prefix() {
        let token = AccessToken::from_static("eyJ0eXAiOiJKV1QiLCJhbGciOi");
        assert_eq!(format!("{:#}", token), "eyJ0eXAiOiJKV1…");
        assert_eq!(format!("{:#4}", token), "eyJ…");

        let password = Password::from_static("hunter2");
        assert_eq!(format!("{:#}", password), "…");
    }

    #[test]
    fn identifiers_display_verbatim() {
        let oid = ObjectId::from_static("4b5f3c9e-0d2a-4d0b-9d6e-6b1d9a7f1e11");
        assert_eq!(oid.to_string(), "4b5f3c9e-0d2a-4d0b-9d6e-6b1d9a7f1e11");
    }
}
