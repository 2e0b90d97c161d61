//! Identity token verification against the cached provider keys.
//!
//! Verification is a two-phase protocol:
//!
//! 1. **Routing** - decode the token without trusting it to learn `kid`, the
//!    first `aud` and `sub` ([`UnverifiedTokenHeader`]).
//! 2. **Trust** - verify the signature with the key the cache holds for that
//!    `kid`, using the algorithm the key record is pinned to, and check `iss`,
//!    `aud`, `sub`, `exp` and `iat`.
//!
//! Nothing from phase 1 reaches the caller. The returned [`VerifiedClaims`]
//! come exclusively from phase 2.
//!
//! # Security
//!
//! - The algorithm comes from the key record, never from the token header
//! - An unknown `kid` is reported as `UnknownKey`, never as a signature failure
//! - Every failure is an error; there is no "unverified but accepted" outcome

use crate::claims::VerifiedClaims;
use crate::error::VerifyError;
use crate::jwt::{validate_iat_at, UnverifiedTokenHeader, APPLE_ISSUER, DEFAULT_CLOCK_SKEW};
use crate::key_cache::KeySetCache;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Claims every identity token must carry.
const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// Verification policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Required `iss`.
    pub issuer: String,

    /// Tolerance for `iat` in the future.
    pub clock_skew: Duration,

    /// Leeway applied to `exp`.
    pub expiry_leeway: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            issuer: APPLE_ISSUER.to_string(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            expiry_leeway: Duration::from_secs(60),
        }
    }
}

impl VerifierConfig {
    /// Set the required issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Verifies identity tokens against a [`KeySetCache`].
///
/// Cheap to clone; clones share the cache.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    cache: Arc<KeySetCache>,
    config: VerifierConfig,
}

impl SignatureVerifier {
    /// Create a verifier reading keys from `cache`.
    #[must_use]
    pub fn new(cache: Arc<KeySetCache>, config: VerifierConfig) -> Self {
        Self { cache, config }
    }

    /// The verification policy.
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify an identity token and return its claims.
    ///
    /// CPU-bound and synchronous; safe to call from many threads while the
    /// cache refreshes.
    ///
    /// # Errors
    ///
    /// - `EmptyToken` for an empty string (no key lookup happens)
    /// - `Malformed` for unusable structure, routing fields or key material
    /// - `UnknownKey` if no key in the current snapshot has the token's `kid`
    /// - `Invalid` for signature, algorithm, issuer, audience, subject, expiry
    ///   or issued-at failures
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        if token.is_empty() {
            tracing::debug!(target: "apple_auth.verifier", "Empty identity token rejected");
            return Err(VerifyError::EmptyToken);
        }

        // Phase 1: routing only.
        let routing = UnverifiedTokenHeader::parse(token)?;

        let record = self.cache.lookup(&routing.key_id).ok_or_else(|| {
            tracing::debug!(
                target: "apple_auth.verifier",
                kid = %routing.key_id,
                "Identity token signed with unknown key"
            );
            VerifyError::UnknownKey(routing.key_id.clone())
        })?;

        let (algorithm, decoding_key) = record.decoding_key().map_err(|e| {
            tracing::warn!(
                target: "apple_auth.verifier",
                kid = %record.kid,
                error = %e,
                "Provider key record unusable"
            );
            e
        })?;

        // Phase 2: trust.
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[routing.audience.as_str()]);
        validation.sub = Some(routing.subject);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.validate_exp = true;
        validation.leeway = self.config.expiry_leeway.as_secs();

        let token_data =
            decode::<VerifiedClaims>(token, &decoding_key, &validation).map_err(|e| {
                let reason = rejection_reason(e.kind());
                tracing::debug!(
                    target: "apple_auth.verifier",
                    kid = %record.kid,
                    reason = %reason,
                    "Identity token rejected"
                );
                VerifyError::Invalid(reason)
            })?;

        let claims = token_data.claims;
        validate_iat_at(
            claims.iat,
            self.config.clock_skew,
            chrono::Utc::now().timestamp(),
        )?;

        tracing::debug!(target: "apple_auth.verifier", kid = %record.kid, "Identity token verified");
        Ok(claims)
    }
}

fn rejection_reason(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::InvalidSignature => "signature mismatch".to_string(),
        ErrorKind::ExpiredSignature => "token expired".to_string(),
        ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidAudience => "audience mismatch".to_string(),
        ErrorKind::InvalidSubject => "subject mismatch".to_string(),
        ErrorKind::InvalidAlgorithm => "algorithm mismatch".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim {claim}"),
        other => format!("{other:?}"),
    }
}
