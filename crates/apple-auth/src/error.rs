//! Error types for Sign in with Apple trust and assertion handling.
//!
//! Each category maps to one component:
//!
//! - [`ConstructionError`] - no usable key set at startup (fatal)
//! - [`FetchError`] - a single key set fetch failed (absorbed by the refresh policy)
//! - [`VerifyError`] - an identity token was rejected
//! - [`SignError`] - a client assertion could not be produced
//! - [`SchedulerError`] - the refresh scheduler was driven out of order
//! - [`GatewayError`] - a provider endpoint call failed
//!
//! Nothing here is ever converted into a "trusted" outcome. Callers that need a
//! yes/no answer must treat every error as a rejection.

use thiserror::Error;

/// Failure to build a client or key set cache.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// The initial key set fetch failed.
    #[error("Initial key set fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The HTTP client could not be built.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failure of a single key set fetch.
///
/// Never surfaced to verification callers. The cache keeps serving the previous
/// snapshot when a refresh fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider returned a non-success status.
    #[error("Key endpoint returned status {0}")]
    Status(u16),

    /// Response body was not a key set.
    #[error("Invalid key set response: {0}")]
    InvalidResponse(String),

    /// Provider returned a key set with no keys.
    #[error("Key set is empty")]
    EmptyKeySet,

    /// The cache has been shut down.
    #[error("Key set cache is closed")]
    Closed,
}

/// Rejection of an identity token.
///
/// Variants are distinguishable so callers can tell a rotated-out key from a
/// forged signature, but the messages stay generic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Empty token string.
    #[error("Identity token is required")]
    EmptyToken,

    /// Token structure, routing fields or key material are unusable.
    #[error("Identity token is malformed: {0}")]
    Malformed(String),

    /// No key with the token's `kid` in the current snapshot.
    #[error("No provider key matches key id {0:?}")]
    UnknownKey(String),

    /// Signature, algorithm or claim check failed.
    #[error("Identity token is invalid: {0}")]
    Invalid(String),
}

/// Failure to produce a client assertion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    /// Private key material could not be decoded or parsed.
    #[error("Invalid signing key: {0}")]
    BadKey(String),

    /// Signing itself failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Misuse of the refresh scheduler lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `start` was called while already running.
    #[error("Refresh scheduler is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`.
    #[error("Refresh scheduler has been stopped")]
    Stopped,
}

/// Failure of a provider endpoint call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider reported an OAuth error.
    #[error("error {error:?}: {description}")]
    Provider {
        /// OAuth error code (e.g. `invalid_grant`).
        error: String,
        /// Human-readable detail supplied by the provider.
        description: String,
    },

    /// Non-success status without a parseable error body.
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Success status with an unusable body.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The HTTP client could not be built.
    #[error("Configuration error: {0}")]
    Configuration(String),
}
