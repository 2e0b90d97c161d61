//! Claims of a verified identity token.
//!
//! Only ever produced by [`crate::verifier::SignatureVerifier`] after the
//! signature and mandatory claims check out. `sub` and `email` identify a
//! person and are redacted in Debug output.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// `real_user_status` value meaning the provider is confident the user is real.
pub const REAL_USER_STATUS_LIKELY_REAL: u8 = 2;

/// Claims of a verified identity token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Issuer.
    pub iss: String,

    /// Audience (the relying application's client identifier). When the token
    /// carries several, the first.
    #[serde(deserialize_with = "first_of_one_or_many")]
    pub aud: String,

    /// Team-scoped user identifier - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// User email, possibly a private relay address - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the provider verified the email.
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verified: Option<bool>,

    /// Whether `email` is a private relay address.
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_private_email: Option<bool>,

    /// Nonce supplied in the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Whether the platform supports nonces.
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce_supported: Option<bool>,

    /// Time of the user's authentication (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Provider's real-user indicator (0 unsupported, 1 unknown, 2 likely real).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<u8>,

    /// Transfer identifier present while a user migrates between teams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_sub: Option<String>,
}

impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("email_verified", &self.email_verified)
            .field("is_private_email", &self.is_private_email)
            .field("nonce_supported", &self.nonce_supported)
            .field("auth_time", &self.auth_time)
            .field("real_user_status", &self.real_user_status)
            .finish_non_exhaustive()
    }
}

impl VerifiedClaims {
    /// Email, only if the provider marked it verified.
    #[must_use]
    pub fn verified_email(&self) -> Option<&str> {
        match self.email_verified {
            Some(true) => self.email.as_deref(),
            _ => None,
        }
    }

    /// Whether the provider is confident this is a real person.
    #[must_use]
    pub fn is_likely_real_user(&self) -> bool {
        self.real_user_status == Some(REAL_USER_STATUS_LIKELY_REAL)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn first_of_one_or_many<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => Ok(value),
        OneOrMany::Many(values) => values
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("aud must not be empty")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

/// The provider sends some booleans as `"true"`/`"false"` strings.
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(value)) => Ok(Some(value)),
        Some(BoolOrString::String(value)) => match value.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(D::Error::custom(format!(
                "expected boolean or \"true\"/\"false\", got {other:?}"
            ))),
        },
    }
}
