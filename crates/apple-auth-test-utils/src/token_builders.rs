//! Builder patterns for test identity tokens
//!
//! Produces identity tokens shaped like the provider's, signed with one of the
//! fixed RSA fixtures.

use crate::crypto_fixtures::{rsa_fixture, RsaFixture};
use apple_auth::jwt::APPLE_ISSUER;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use serde_json::{json, Map, Value};

/// Audience used by default.
pub const TEST_CLIENT_ID: &str = "com.example.app";

/// Subject used by default.
pub const TEST_SUBJECT: &str = "001234.0123456789abcdef0123456789abcdef.0123";

/// Builder for signed identity tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestIdTokenBuilder::new()
///     .signed_with(rsa_fixture(1))
///     .for_subject("001234.abc.0123")
///     .expires_in(600)
///     .build();
/// ```
pub struct TestIdTokenBuilder {
    fixture: RsaFixture,
    kid: Option<String>,
    algorithm: Algorithm,
    claims: Map<String, Value>,
}

impl TestIdTokenBuilder {
    /// Token signed by fixture 1, valid for one hour, issued by the provider.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(APPLE_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_CLIENT_ID));
        claims.insert("sub".to_string(), json!(TEST_SUBJECT));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );

        Self {
            fixture: rsa_fixture(1),
            kid: None,
            algorithm: Algorithm::RS256,
            claims,
        }
    }

    /// Sign with the given fixture (its `kid` goes in the header).
    pub fn signed_with(mut self, fixture: RsaFixture) -> Self {
        self.fixture = fixture;
        self
    }

    /// Override the header `kid` without changing the signing key.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Sign with a different RSA algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set `iss`.
    pub fn issued_by(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    /// Set `aud` to a single value.
    pub fn for_audience(self, audience: &str) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Set `aud` to an array.
    pub fn for_audiences(self, audiences: &[&str]) -> Self {
        self.with_claim("aud", json!(audiences))
    }

    /// Set `sub`.
    pub fn for_subject(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Set `exp` relative to now (negative for already expired).
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set `iat` to an absolute timestamp.
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    /// Add the provider's email claims (booleans as strings, like the provider).
    pub fn with_email(self, email: &str, verified: bool, private: bool) -> Self {
        self.with_claim("email", json!(email))
            .with_claim("email_verified", json!(verified.to_string()))
            .with_claim("is_private_email", json!(private.to_string()))
    }

    /// Set any claim.
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim.
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Sign and serialize.
    ///
    /// # Panics
    ///
    /// Panics if signing fails.
    pub fn build(self) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.unwrap_or_else(|| self.fixture.kid.to_string()));

        encode(&header, &Value::Object(self.claims), &self.fixture.encoding_key())
            .expect("test identity token must sign")
    }
}

impl Default for TestIdTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
