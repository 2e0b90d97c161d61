//! Client configuration.
//!
//! Everything is supplied at construction. The library never reads environment
//! variables or files; binaries map their own configuration onto
//! [`ClientConfig`].

use crate::gateway::GatewayConfig;
use crate::jwt::{APPLE_ISSUER, DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use crate::refresh::{RefreshFailure, RefreshFailureHandler, SchedulerConfig};
use crate::verifier::VerifierConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default key set refresh period (32 minutes).
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(32 * 60);

/// Default timeout for a single provider request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default leeway applied to `exp` checks.
pub const DEFAULT_EXPIRY_LEEWAY: Duration = Duration::from_secs(60);

/// Default `User-Agent` sent to the provider.
pub const DEFAULT_USER_AGENT: &str = concat!("apple-auth-rs/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`crate::AppleIdClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Provider base URL (keys, token, revoke and migration endpoints).
    pub base_url: String,

    /// Issuer identity tokens must carry.
    pub expected_issuer: String,

    /// Period between background key set refreshes.
    pub refresh_period: Duration,

    /// Timeout for each provider request.
    pub fetch_timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// `User-Agent` header value.
    pub user_agent: String,

    /// Tolerance for `iat` values in the future.
    pub clock_skew: Duration,

    /// Leeway applied to `exp`.
    pub expiry_leeway: Duration,

    /// Called when a refresh tick exhausts its retry budget.
    pub on_refresh_failed: RefreshFailureHandler,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("expected_issuer", &self.expected_issuer)
            .field("refresh_period", &self.refresh_period)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .field("clock_skew", &self.clock_skew)
            .field("expiry_leeway", &self.expiry_leeway)
            .field("on_refresh_failed", &"<handler>")
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Configuration pointing at the production provider with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: APPLE_ISSUER.to_string(),
            expected_issuer: APPLE_ISSUER.to_string(),
            refresh_period: DEFAULT_REFRESH_PERIOD,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            expiry_leeway: DEFAULT_EXPIRY_LEEWAY,
            on_refresh_failed: Arc::new(|_: &RefreshFailure| {}),
        }
    }

    /// Point the client at a different provider host (tests, proxies).
    ///
    /// The expected issuer is left unchanged.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the issuer identity tokens must carry.
    #[must_use]
    pub fn with_expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = issuer.into();
        self
    }

    /// Set the background refresh period.
    #[must_use]
    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the `iat` tolerance, capped at [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        if clock_skew > MAX_CLOCK_SKEW {
            tracing::warn!(
                target: "apple_auth.config",
                requested_secs = clock_skew.as_secs(),
                max_secs = MAX_CLOCK_SKEW.as_secs(),
                "Clock skew above maximum, capping"
            );
        }
        self.clock_skew = clock_skew.min(MAX_CLOCK_SKEW);
        self
    }

    /// Set the leeway applied to `exp`.
    #[must_use]
    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Set the handler invoked when a refresh tick fails.
    #[must_use]
    pub fn with_refresh_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RefreshFailure) + Send + Sync + 'static,
    {
        self.on_refresh_failed = Arc::new(handler);
        self
    }

    /// Gateway settings derived from this configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.base_url.clone(),
            timeout: self.fetch_timeout,
            connect_timeout: self.connect_timeout,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Verifier settings derived from this configuration.
    #[must_use]
    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            issuer: self.expected_issuer.clone(),
            clock_skew: self.clock_skew,
            expiry_leeway: self.expiry_leeway,
        }
    }

    /// Scheduler settings derived from this configuration.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.refresh_period).with_failure_handler_arc(Arc::clone(
            &self.on_refresh_failed,
        ))
    }
}
