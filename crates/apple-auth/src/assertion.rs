//! Client assertion (`client_secret`) generation.
//!
//! The provider's token, revoke and migration endpoints authenticate the relying
//! application with a short-lived ES256 JWT signed by the team's private key:
//!
//! ```text
//! header: {"alg": "ES256", "kid": <key id>, "typ": "JWT"}
//! claims: {"iss": <team id>, "sub": <client id>, "aud": ["https://appleid.apple.com"],
//!          "iat": now, "exp": now + 180 days - 1 second}
//! ```
//!
//! [`generate`] is pure given `now`: no I/O, no caching and no automatic
//! renewal. Callers may cache the result until [`ClientAssertion::expires_at`].

use crate::error::SignError;
use crate::jwt::APPLE_ISSUER;
use crate::secret::{ExposeSecret, SecretString};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

/// Signature algorithm mandated for client assertions.
pub const CLIENT_ASSERTION_ALGORITHM: Algorithm = Algorithm::ES256;

/// Lifetime of a client assertion in seconds (180 days minus one second).
pub const CLIENT_ASSERTION_VALIDITY_SECS: i64 = 180 * 24 * 60 * 60 - 1;

/// PEM label of a PKCS#8 private key (the provider's `.p8` format).
const PKCS8_PEM_LABEL: &str = "PRIVATE KEY";

/// Credentials for signing client assertions.
///
/// The signing key never appears in Debug output and is not serialized.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningCredential {
    /// 10-character identifier of the signing key.
    pub key_id: String,

    /// Services ID or bundle ID of the relying application.
    pub client_id: String,

    /// 10-character developer team identifier.
    pub team_id: String,

    /// PEM-encoded PKCS#8 P-256 private key.
    pub signing_key: SecretString,
}

impl SigningCredential {
    /// Bundle the four credential parts.
    #[must_use]
    pub fn new(
        key_id: impl Into<String>,
        client_id: impl Into<String>,
        team_id: impl Into<String>,
        signing_key: SecretString,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            client_id: client_id.into(),
            team_id: team_id.into(),
            signing_key,
        }
    }
}

/// Claims carried by a client assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Team identifier.
    pub iss: String,

    /// Client identifier.
    pub sub: String,

    /// Always `["https://appleid.apple.com"]`.
    pub aud: Vec<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl ClientAssertionClaims {
    fn new(credential: &SigningCredential, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: credential.team_id.clone(),
            sub: credential.client_id.clone(),
            aud: vec![APPLE_ISSUER.to_string()],
            exp: iat + CLIENT_ASSERTION_VALIDITY_SECS,
            iat,
        }
    }
}

/// A signed, serialized client assertion.
#[derive(Clone)]
pub struct ClientAssertion {
    token: SecretString,
    claims: ClientAssertionClaims,
}

impl fmt::Debug for ClientAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertion")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

impl ClientAssertion {
    /// The compact JWS to send as `client_secret`.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// The signed claims.
    #[must_use]
    pub fn claims(&self) -> &ClientAssertionClaims {
        &self.claims
    }

    /// Issue time.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.iat, 0).unwrap_or_default()
    }

    /// Expiry time.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }

    /// Whether the assertion has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.claims.exp
    }
}

/// Build and sign a client assertion issued at `now`.
///
/// # Errors
///
/// - `SignError::BadKey` if the PEM cannot be decoded or is not a PKCS#8 P-256 key
/// - `SignError::SigningFailed` if signing fails
#[instrument(skip_all, fields(key_id = %credential.key_id))]
pub fn generate(
    credential: &SigningCredential,
    now: DateTime<Utc>,
) -> Result<ClientAssertion, SignError> {
    let der = decode_pkcs8_pem(credential.signing_key.expose_secret())?;

    // Parse with ring up front so malformed keys surface as BadKey rather than
    // as a signing failure.
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &der, &SystemRandom::new())
        .map_err(|e| {
            tracing::debug!(target: "apple_auth.assertion", error = %e, "Signing key rejected");
            SignError::BadKey("not a PKCS#8 P-256 private key".to_string())
        })?;

    let claims = ClientAssertionClaims::new(credential, now);

    let mut header = Header::new(CLIENT_ASSERTION_ALGORITHM);
    header.kid = Some(credential.key_id.clone());

    let token = encode(&header, &claims, &EncodingKey::from_ec_der(&der)).map_err(|e| {
        tracing::warn!(target: "apple_auth.assertion", error = %e, "Client assertion signing failed");
        SignError::SigningFailed(e.to_string())
    })?;

    tracing::debug!(
        target: "apple_auth.assertion",
        exp = claims.exp,
        "Client assertion generated"
    );

    Ok(ClientAssertion {
        token: SecretString::from(token),
        claims,
    })
}

/// Extract the DER body of a PEM block, which must be `PRIVATE KEY`.
fn decode_pkcs8_pem(encoded: &str) -> Result<Vec<u8>, SignError> {
    let block = pem::parse(encoded.trim()).map_err(|e| {
        SignError::BadKey(format!("failed to decode signing private key: {e}"))
    })?;

    if block.tag() != PKCS8_PEM_LABEL {
        return Err(SignError::BadKey(format!(
            "expected {PKCS8_PEM_LABEL} block, found {}",
            block.tag()
        )));
    }

    if block.contents().is_empty() {
        return Err(SignError::BadKey("empty PEM body".to_string()));
    }

    Ok(block.into_contents())
}
