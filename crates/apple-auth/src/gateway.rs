//! HTTP client for the identity provider's endpoints.
//!
//! All endpoints live under one base URL:
//!
//! | Path                       | Method | Purpose                                   |
//! |----------------------------|--------|-------------------------------------------|
//! | `/auth/keys`               | GET    | Public signing keys ([`KeySource`])       |
//! | `/auth/token`              | POST   | Code / refresh token validation, migration token |
//! | `/auth/revoke`             | POST   | Token revocation                          |
//! | `/auth/usermigrationinfo`  | POST   | Transfer identifier generation / exchange |
//!
//! POST bodies are form encoded. Each call is a single attempt bounded by the
//! configured timeout; retries are left to callers. Client secrets, access and
//! refresh tokens are passed as [`SecretString`] and never logged.

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_FETCH_TIMEOUT, DEFAULT_USER_AGENT};
use crate::error::{FetchError, GatewayError};
use crate::jwt::APPLE_ISSUER;
use crate::key_cache::KeySource;
use crate::keys::JwkSet;
use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Public key set endpoint.
pub const KEYS_PATH: &str = "/auth/keys";

/// Token validation endpoint.
pub const TOKEN_PATH: &str = "/auth/token";

/// Token revocation endpoint.
pub const REVOKE_PATH: &str = "/auth/revoke";

/// User migration endpoint.
pub const USER_MIGRATION_PATH: &str = "/auth/usermigrationinfo";

/// Scope requested for migration access tokens.
const MIGRATION_SCOPE: &str = "user.migration";

/// HTTP settings for [`ProviderGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Provider base URL without a trailing slash.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: APPLE_ISSUER.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Successful response of the token endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    /// Access token (reserved by the provider, currently only used for migration).
    #[serde(default)]
    pub access_token: Option<SecretString>,

    /// Always `bearer`.
    #[serde(default)]
    pub token_type: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Long-lived refresh token. Store it securely.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,

    /// Identity token for the user, verify it before use.
    #[serde(default)]
    pub id_token: Option<SecretString>,
}

/// Recipient-team view of a transferred user.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ExchangeIdentifierResponse {
    /// Recipient team-scoped user identifier.
    pub sub: String,

    /// Private relay email for the recipient team, if the user used one.
    #[serde(default)]
    pub email: Option<String>,

    /// Whether `email` is a private relay address.
    #[serde(default)]
    pub is_private_email: Option<bool>,
}

impl fmt::Debug for ExchangeIdentifierResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeIdentifierResponse")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("is_private_email", &self.is_private_email)
            .finish()
    }
}

#[derive(Deserialize)]
struct TransferSubResponse {
    #[serde(default)]
    transfer_sub: Option<String>,
}

/// OAuth error body (`{"error": "...", "error_description": "..."}`).
#[derive(Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the provider's HTTP endpoints.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    base_url: String,
    http_client: reqwest::Client,
}

impl ProviderGateway {
    /// Build a gateway.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                GatewayError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// The provider base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchange an authorization code obtained by a native app.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn validate_app_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        code: &str,
    ) -> Result<TokenResponse, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        self.post_json(TOKEN_PATH, &form, None).await
    }

    /// Exchange an authorization code obtained by a web redirect.
    ///
    /// `redirect_uri` must match the one used in the authorization request.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn validate_web_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        self.post_json(TOKEN_PATH, &form, None).await
    }

    /// Check a refresh token and obtain a fresh access token.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn validate_refresh_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];
        self.post_json(TOKEN_PATH, &form, None).await
    }

    /// Obtain an access token scoped to user migration.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn obtain_migration_access_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<TokenResponse, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", MIGRATION_SCOPE),
            ("grant_type", "client_credentials"),
        ];
        self.post_json(TOKEN_PATH, &form, None).await
    }

    /// Revoke an access token.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn revoke_access_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        access_token: &SecretString,
    ) -> Result<(), GatewayError> {
        self.revoke(client_id, client_secret, access_token, "access_token")
            .await
    }

    /// Revoke a refresh token (and the user's session with the app).
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn revoke_refresh_token(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        refresh_token: &SecretString,
    ) -> Result<(), GatewayError> {
        self.revoke(client_id, client_secret, refresh_token, "refresh_token")
            .await
    }

    async fn revoke(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        token: &SecretString,
        token_type_hint: &str,
    ) -> Result<(), GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("token", token.expose_secret()),
            ("token_type_hint", token_type_hint),
        ];
        // Success bodies are empty.
        self.post_form(REVOKE_PATH, &form, None).await?;
        debug!(target: "apple_auth.gateway", token_type_hint = %token_type_hint, "Token revoked");
        Ok(())
    }

    /// Generate the transfer identifier for a user moving to `recipient_team_id`.
    ///
    /// `access_token` must come from [`obtain_migration_access_token`](Self::obtain_migration_access_token).
    ///
    /// # Errors
    ///
    /// `GatewayError::InvalidResponse` if the provider returns no identifier;
    /// otherwise see [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id, target_team = %recipient_team_id))]
    pub async fn generate_transfer_sub(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        access_token: &SecretString,
        sub: &str,
        recipient_team_id: &str,
    ) -> Result<String, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("sub", sub),
            ("target", recipient_team_id),
        ];
        let response: TransferSubResponse = self
            .post_json(USER_MIGRATION_PATH, &form, Some(access_token))
            .await?;

        response
            .transfer_sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("missing transfer_sub".to_string()))
    }

    /// Exchange a transfer identifier for the recipient team's user identifier.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`].
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn exchange_identifier(
        &self,
        client_id: &str,
        client_secret: &SecretString,
        access_token: &SecretString,
        transfer_sub: &str,
    ) -> Result<ExchangeIdentifierResponse, GatewayError> {
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("transfer_sub", transfer_sub),
        ];
        self.post_json(USER_MIGRATION_PATH, &form, Some(access_token))
            .await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
        bearer: Option<&SecretString>,
    ) -> Result<T, GatewayError> {
        let body = self.post_form(path, form, bearer).await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!(target: "apple_auth.gateway", path = %path, error = %e, "Failed to parse provider response");
            GatewayError::InvalidResponse(e.to_string())
        })
    }

    /// POST a form and return the body of a successful, error-free response.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        bearer: Option<&SecretString>,
    ) -> Result<String, GatewayError> {
        let url = self.url(path);
        debug!(target: "apple_auth.gateway", url = %url, "Calling provider");

        let mut request = self.http_client.post(&url).form(form);
        if let Some(token) = bearer {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "apple_auth.gateway", url = %url, error = %e, "Provider request failed");
            GatewayError::Http(e.to_string())
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(target: "apple_auth.gateway", error = %e, "Failed to read provider response");
            GatewayError::Http(e.to_string())
        })?;

        if let Some(err) = provider_error(&body) {
            warn!(target: "apple_auth.gateway", status = %status, error = %err, "Provider rejected request");
            return Err(err);
        }

        if !status.is_success() {
            warn!(target: "apple_auth.gateway", status = %status, "Unexpected provider status");
            trace!(target: "apple_auth.gateway", body = %body, "Unexpected provider response body");
            return Err(GatewayError::Status(status.as_u16()));
        }

        Ok(body)
    }
}

/// The provider's OAuth error, if the body carries a non-empty `error`.
fn provider_error(body: &str) -> Option<GatewayError> {
    let parsed: ProviderErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error.filter(|e| !e.is_empty())?;
    Some(GatewayError::Provider {
        error,
        description: parsed.error_description.unwrap_or_default(),
    })
}

#[async_trait]
impl KeySource for ProviderGateway {
    #[instrument(skip_all)]
    async fn fetch_keys(&self) -> Result<JwkSet, FetchError> {
        let url = self.url(KEYS_PATH);
        debug!(target: "apple_auth.gateway", url = %url, "Fetching provider key set");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            warn!(target: "apple_auth.gateway", error = %e, "Key set request failed");
            FetchError::Http(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "apple_auth.gateway", status = %status, "Key set endpoint returned error");
            return Err(FetchError::Status(status.as_u16()));
        }

        response.json::<JwkSet>().await.map_err(|e| {
            warn!(target: "apple_auth.gateway", error = %e, "Failed to parse key set");
            FetchError::InvalidResponse(e.to_string())
        })
    }
}
