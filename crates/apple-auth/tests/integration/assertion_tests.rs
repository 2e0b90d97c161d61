//! Client assertion integration tests
//!
//! Generated assertions are checked end to end by publishing the generating
//! key's public half as an ES256 record and running them through the verifier.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apple_auth::assertion::{generate, SigningCredential, CLIENT_ASSERTION_VALIDITY_SECS};
use apple_auth::error::{SignError, VerifyError};
use apple_auth::jwt::APPLE_ISSUER;
use apple_auth::key_cache::KeySetCache;
use apple_auth::secret::{ExposeSecret, SecretString};
use apple_auth::verifier::{SignatureVerifier, VerifierConfig};
use apple_auth_test_utils::{generate_p256_key_pair, pem_wrap, rsa_fixture, TestKeySource};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const KEY_ID: &str = "ABC123DEFG";
const TEAM_ID: &str = "TEAM123456";
const CLIENT_ID: &str = "com.example.app";

fn credential(signing_key: SecretString) -> SigningCredential {
    SigningCredential::new(KEY_ID, CLIENT_ID, TEAM_ID, signing_key)
}

async fn verifier_trusting(
    records: Vec<apple_auth::PublicKeyRecord>,
) -> Result<SignatureVerifier, anyhow::Error> {
    let cache = KeySetCache::new(TestKeySource::new(records)).await?;
    Ok(SignatureVerifier::new(
        Arc::new(cache),
        VerifierConfig::default().with_issuer(TEAM_ID),
    ))
}

#[tokio::test]
async fn test_round_trip_through_verifier() -> Result<(), anyhow::Error> {
    let key_pair = generate_p256_key_pair()?;
    let assertion = generate(&credential(key_pair.signing_key()), Utc::now())?;

    let verifier = verifier_trusting(vec![key_pair.public_record(KEY_ID)]).await?;
    let claims = verifier.verify(assertion.token().expose_secret())?;

    assert_eq!(claims.iss, TEAM_ID);
    assert_eq!(claims.sub, CLIENT_ID);
    assert_eq!(claims.aud, APPLE_ISSUER);
    assert_eq!(claims.exp - claims.iat, CLIENT_ASSERTION_VALIDITY_SECS);

    Ok(())
}

#[tokio::test]
async fn test_assertion_from_other_key_is_invalid() -> Result<(), anyhow::Error> {
    let signer = generate_p256_key_pair()?;
    let published = generate_p256_key_pair()?;
    let assertion = generate(&credential(signer.signing_key()), Utc::now())?;

    let verifier = verifier_trusting(vec![published.public_record(KEY_ID)]).await?;

    assert!(matches!(
        verifier.verify(assertion.token().expose_secret()),
        Err(VerifyError::Invalid(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_ec_token_against_rsa_record_is_rejected() -> Result<(), anyhow::Error> {
    let key_pair = generate_p256_key_pair()?;
    let assertion = generate(&credential(key_pair.signing_key()), Utc::now())?;

    // Same kid, but the published record is an RS256 key.
    let verifier = verifier_trusting(vec![rsa_fixture(1).public_record_as(KEY_ID)]).await?;

    assert!(matches!(
        verifier.verify(assertion.token().expose_secret()),
        Err(VerifyError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn test_expiry_is_180_days_minus_one_second() -> Result<(), anyhow::Error> {
    let key_pair = generate_p256_key_pair()?;
    let now = DateTime::from_timestamp(1_735_689_600, 0).unwrap();

    let assertion = generate(&credential(key_pair.signing_key()), now)?;

    assert_eq!(assertion.issued_at(), now);
    assert_eq!(
        assertion.expires_at(),
        now + Duration::days(180) - Duration::seconds(1)
    );
    assert!(assertion.expires_at() - assertion.issued_at() < Duration::days(180));
    Ok(())
}

#[test]
fn test_generation_is_pure_in_now() -> Result<(), anyhow::Error> {
    let key_pair = generate_p256_key_pair()?;
    let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

    let first = generate(&credential(key_pair.signing_key()), now)?;
    let second = generate(&credential(key_pair.signing_key()), now)?;

    // ECDSA signatures are randomized; the claims are not.
    assert_eq!(first.claims(), second.claims());
    Ok(())
}

#[test]
fn test_rsa_private_key_is_bad_key() {
    let pem = rsa_fixture(1).private_key_pem.to_string();
    let result = generate(&credential(SecretString::from(pem)), Utc::now());

    assert!(matches!(result, Err(SignError::BadKey(_))));
}

#[test]
fn test_garbage_pkcs8_is_bad_key() {
    let pem = pem_wrap("PRIVATE KEY", b"definitely not a key");
    let result = generate(&credential(SecretString::from(pem)), Utc::now());

    assert!(matches!(result, Err(SignError::BadKey(_))));
}

#[test]
fn test_empty_key_is_bad_key() {
    let result = generate(&credential(SecretString::from(String::new())), Utc::now());
    assert!(matches!(result, Err(SignError::BadKey(_))));
}
