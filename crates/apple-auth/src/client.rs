//! High-level client wiring the key cache, refresh scheduler, verifier and
//! provider gateway together.
//!
//! ```rust,ignore
//! let client = AppleIdClient::new(ClientConfig::new()).await?;
//! let claims = client.verify(&id_token)?;
//! // ...
//! client.close().await;
//! ```

use crate::claims::VerifiedClaims;
use crate::config::ClientConfig;
use crate::error::{ConstructionError, FetchError, VerifyError};
use crate::gateway::ProviderGateway;
use crate::key_cache::{KeySetCache, KeySource};
use crate::keys::KeySetSnapshot;
use crate::refresh::RefreshScheduler;
use crate::verifier::SignatureVerifier;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Verifies identity tokens with an automatically refreshed key set and
/// exposes the provider's token endpoints.
///
/// Construction fetches the key set once and starts the background refresh.
/// Call [`close`](Self::close) to stop refreshing; dropping the client also
/// cancels the background task.
pub struct AppleIdClient {
    gateway: ProviderGateway,
    cache: Arc<KeySetCache>,
    verifier: SignatureVerifier,
    scheduler: Mutex<RefreshScheduler>,
}

impl std::fmt::Debug for AppleIdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleIdClient")
            .field("base_url", &self.gateway.base_url())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AppleIdClient {
    /// Build a client that fetches keys from the provider's key endpoint.
    ///
    /// # Errors
    ///
    /// - `ConstructionError::Configuration` if the HTTP client cannot be built
    /// - `ConstructionError::Fetch` if the initial key fetch fails or is empty
    #[instrument(skip_all, fields(base_url = %config.base_url))]
    pub async fn new(config: ClientConfig) -> Result<Self, ConstructionError> {
        let gateway = build_gateway(&config)?;
        let source: Arc<dyn KeySource> = Arc::new(gateway.clone());
        Self::assemble(config, gateway, source).await
    }

    /// Build a client that reads keys from `source` instead of the key endpoint.
    ///
    /// Token, revoke and migration calls still go to `config.base_url`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    #[instrument(skip_all)]
    pub async fn with_key_source(
        config: ClientConfig,
        source: Arc<dyn KeySource>,
    ) -> Result<Self, ConstructionError> {
        let gateway = build_gateway(&config)?;
        Self::assemble(config, gateway, source).await
    }

    async fn assemble(
        config: ClientConfig,
        gateway: ProviderGateway,
        source: Arc<dyn KeySource>,
    ) -> Result<Self, ConstructionError> {
        let cache = Arc::new(KeySetCache::new(source).await?);
        let verifier = SignatureVerifier::new(Arc::clone(&cache), config.verifier_config());

        let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), config.scheduler_config());
        scheduler
            .start()
            .map_err(|e| ConstructionError::Configuration(e.to_string()))?;

        tracing::info!(
            target: "apple_auth.client",
            key_count = cache.current().len(),
            refresh_period_secs = config.refresh_period.as_secs(),
            "Client ready"
        );

        Ok(Self {
            gateway,
            cache,
            verifier,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Verify an identity token against the current key set.
    ///
    /// # Errors
    ///
    /// See [`SignatureVerifier::verify`].
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        self.verifier.verify(token)
    }

    /// The underlying verifier, for sharing with other tasks.
    #[must_use]
    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    /// The key set cache.
    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeySetCache> {
        &self.cache
    }

    /// The key set currently used for verification.
    #[must_use]
    pub fn current_keys(&self) -> Arc<KeySetSnapshot> {
        self.cache.current()
    }

    /// Refresh the key set now, outside the schedule.
    ///
    /// # Errors
    ///
    /// See [`KeySetCache::refresh`].
    pub async fn refresh_keys(&self) -> Result<Arc<KeySetSnapshot>, FetchError> {
        self.cache.refresh().await
    }

    /// The provider endpoint client.
    #[must_use]
    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Stop the background refresh and close the cache.
    ///
    /// Verification keeps working against the last snapshot. Idempotent.
    #[instrument(skip_all)]
    pub async fn close(&self) {
        self.scheduler.lock().await.stop().await;
        tracing::info!(target: "apple_auth.client", "Client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}

fn build_gateway(config: &ClientConfig) -> Result<ProviderGateway, ConstructionError> {
    ProviderGateway::new(config.gateway_config())
        .map_err(|e| ConstructionError::Configuration(e.to_string()))
}
