//! Sign in with Apple provider trust for relying applications.
//!
//! - [`key_cache`] keeps the provider's public signing keys in an atomically
//!   swapped snapshot, refreshed in the background by [`refresh`].
//! - [`verifier`] checks identity tokens against that snapshot.
//! - [`assertion`] produces the ES256 client assertion used as `client_secret`.
//! - [`gateway`] talks to the provider's key, token, revoke and migration endpoints.
//!
//! [`AppleIdClient`] wires all of them together.

#![warn(clippy::pedantic)]

/// Module for error types
pub mod error;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for client configuration
pub mod config;

/// Module for untrusted token inspection and JWT constants
pub mod jwt;

/// Module for provider key records and snapshots
pub mod keys;

/// Module for the provider key set cache
pub mod key_cache;

/// Module for background key set refresh
pub mod refresh;

/// Module for verified identity token claims
pub mod claims;

/// Module for identity token verification
pub mod verifier;

/// Module for client assertion generation
pub mod assertion;

/// Module for the provider HTTP endpoints
pub mod gateway;

mod client;

pub use assertion::{generate as generate_client_assertion, ClientAssertion, SigningCredential};
pub use claims::VerifiedClaims;
pub use client::AppleIdClient;
pub use config::ClientConfig;
pub use error::{
    ConstructionError, FetchError, GatewayError, SchedulerError, SignError, VerifyError,
};
pub use gateway::ProviderGateway;
pub use key_cache::{KeySetCache, KeySource};
pub use keys::{JwkSet, KeySetSnapshot, PublicKeyRecord};
pub use refresh::{RefreshFailure, RefreshScheduler, SchedulerConfig};
pub use verifier::{SignatureVerifier, VerifierConfig};
