//! `AppleIdClient` integration tests against a mock provider over HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apple_auth::assertion::{generate, SigningCredential};
use apple_auth::error::{ConstructionError, FetchError, GatewayError, VerifyError};
use apple_auth::secret::{ExposeSecret, SecretString};
use apple_auth::{AppleIdClient, ClientConfig};
use apple_auth_test_utils::{
    generate_p256_key_pair, rsa_fixture, MockProvider, TestIdTokenBuilder, TestKeySource,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

fn config_for(provider: &MockProvider) -> ClientConfig {
    ClientConfig::new()
        .with_base_url(provider.base_url())
        .with_fetch_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_client_verifies_tokens_from_provider_keys() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    provider
        .publish_keys(vec![rsa_fixture(1).public_record()])
        .await;

    let client = AppleIdClient::new(config_for(&provider)).await?;
    let claims = client.verify(&TestIdTokenBuilder::new().build())?;

    assert_eq!(claims.iss, "https://appleid.apple.com");
    assert_eq!(provider.key_requests().await, 1);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_construction_fails_when_keys_unavailable() {
    let provider = MockProvider::start().await;
    provider.fail_keys(500).await;

    let result = AppleIdClient::new(config_for(&provider)).await;

    assert!(matches!(
        result,
        Err(ConstructionError::Fetch(FetchError::Status(500)))
    ));
}

#[tokio::test]
async fn test_client_construction_fails_on_empty_key_set() {
    let provider = MockProvider::start().await;
    provider.publish_keys(Vec::new()).await;

    assert!(matches!(
        AppleIdClient::new(config_for(&provider)).await,
        Err(ConstructionError::Fetch(FetchError::EmptyKeySet))
    ));
}

#[tokio::test]
async fn test_client_background_refresh_rotates_keys() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    provider
        .publish_keys_times(vec![rsa_fixture(1).public_record()], 1)
        .await;
    provider
        .publish_keys(vec![rsa_fixture(2).public_record()])
        .await;

    let client = AppleIdClient::new(
        config_for(&provider).with_refresh_period(Duration::from_millis(50)),
    )
    .await?;
    let token = TestIdTokenBuilder::new().signed_with(rsa_fixture(2)).build();
    assert_eq!(
        client.verify(&token),
        Err(VerifyError::UnknownKey("TESTKEY002".to_string()))
    );

    tokio::time::sleep(Duration::from_millis(200)).await;

    client.verify(&token)?;
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_failure_handler_on_provider_outage() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    provider
        .publish_keys_times(vec![rsa_fixture(1).public_record()], 1)
        .await;
    provider.fail_keys(503).await;

    let reports = Arc::new(AtomicU32::new(0));
    let reports_clone = Arc::clone(&reports);
    let config = config_for(&provider)
        .with_refresh_period(Duration::from_millis(50))
        .with_refresh_failure_handler(move |failure| {
            if failure.last_error == Some(FetchError::Status(503)) {
                reports_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

    let client = AppleIdClient::new(config).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close().await;

    assert!(reports.load(Ordering::SeqCst) >= 1);
    // Stale keys keep serving after the outage.
    client.verify(&TestIdTokenBuilder::new().build())?;
    Ok(())
}

#[tokio::test]
async fn test_client_with_key_source_uses_gateway_for_tokens() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh",
            "id_token": TestIdTokenBuilder::new().build()
        })))
        .expect(1)
        .mount(provider.server())
        .await;

    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let client = AppleIdClient::with_key_source(config_for(&provider), source).await?;
    assert_eq!(provider.key_requests().await, 0);

    let key_pair = generate_p256_key_pair()?;
    let credential = SigningCredential::new(
        "ABC123DEFG",
        "com.example.app",
        "TEAM123456",
        key_pair.signing_key(),
    );
    let assertion = generate(&credential, Utc::now())?;

    let response = client
        .gateway()
        .validate_app_token(&credential.client_id, assertion.token(), "auth-code")
        .await?;
    let id_token = response.id_token.expect("id token");
    let claims = client.verify(id_token.expose_secret())?;

    assert_eq!(claims.aud, "com.example.app");
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_surfaces_provider_errors() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    provider
        .publish_keys(vec![rsa_fixture(1).public_record()])
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/revoke"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "client authentication failed"
        })))
        .mount(provider.server())
        .await;

    let client = AppleIdClient::new(config_for(&provider)).await?;
    let err = client
        .gateway()
        .revoke_refresh_token(
            "com.example.app",
            &SecretString::from("assertion"),
            &SecretString::from("refresh"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Provider { ref error, .. } if error == "invalid_client"));
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_close_stops_key_requests() -> Result<(), anyhow::Error> {
    let provider = MockProvider::start().await;
    provider
        .publish_keys(vec![rsa_fixture(1).public_record()])
        .await;

    let client = AppleIdClient::new(
        config_for(&provider).with_refresh_period(Duration::from_millis(20)),
    )
    .await?;
    tokio::time::sleep(Duration::from_millis(70)).await;
    client.close().await;

    let requests_at_close = provider.key_requests().await;
    assert!(requests_at_close >= 2);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(provider.key_requests().await, requests_at_close);
    assert!(client.is_closed());
    Ok(())
}
