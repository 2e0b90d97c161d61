//! # Apple Auth Test Utilities
//!
//! Shared test utilities for the `apple-auth` crate.
//!
//! This crate provides:
//! - Fixed RSA key pairs standing in for the provider's signing keys
//! - Freshly generated P-256 key pairs for client assertions
//! - An identity token builder (`TestIdTokenBuilder`)
//! - An in-memory key source (`TestKeySource`)
//! - A mock provider HTTP server (`MockProvider`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apple_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
//!     let cache = Arc::new(KeySetCache::new(source).await?);
//!     let verifier = SignatureVerifier::new(cache, VerifierConfig::default());
//!
//!     let token = TestIdTokenBuilder::new().build();
//!     let claims = verifier.verify(&token)?;
//! }
//! ```

pub mod crypto_fixtures;
pub mod key_sources;
pub mod mock_provider;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use key_sources::*;
pub use mock_provider::*;
pub use token_builders::*;
