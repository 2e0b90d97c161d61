//! Operator CLI configuration.
//!
//! Loaded from environment variables. The signing key is read from the file
//! named by `APPLE_PRIVATE_KEY_PATH` and never appears in Debug output.

use apple_auth::assertion::SigningCredential;
use apple_auth::jwt::{APPLE_ISSUER, MAX_CLOCK_SKEW};
use apple_auth::secret::SecretString;
use apple_auth::ClientConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// CLI configuration.
#[derive(Clone)]
pub struct CliConfig {
    /// Signing key identifier.
    pub key_id: String,

    /// Services ID or bundle ID.
    pub client_id: String,

    /// Developer team identifier.
    pub team_id: String,

    /// Path to the `.p8` private key.
    pub private_key_path: PathBuf,

    /// Provider base URL (default: production).
    pub base_url: String,

    /// Redirect URI for web authorization codes, if any.
    pub redirect_uri: Option<String>,

    /// `iat` tolerance for identity token verification, if overridden.
    pub clock_skew: Option<Duration>,
}

impl fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliConfig")
            .field("key_id", &self.key_id)
            .field("client_id", &self.client_id)
            .field("team_id", &self.team_id)
            .field("private_key_path", &self.private_key_path)
            .field("base_url", &self.base_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid clock skew configuration: {0}")]
    InvalidClockSkew(String),

    #[error("Failed to read private key {path}: {reason}")]
    PrivateKey { path: String, reason: String },
}

impl CliConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            vars.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let key_id = required("APPLE_KEY_ID")?;
        let client_id = required("APPLE_CLIENT_ID")?;
        let team_id = required("APPLE_TEAM_ID")?;
        let private_key_path = PathBuf::from(required("APPLE_PRIVATE_KEY_PATH")?);

        let base_url = vars
            .get("APPLE_BASE_URL")
            .cloned()
            .unwrap_or_else(|| APPLE_ISSUER.to_string());

        let redirect_uri = vars.get("APPLE_REDIRECT_URI").cloned();

        let clock_skew = match vars.get("APPLE_CLOCK_SKEW_SECONDS") {
            None => None,
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidClockSkew(format!(
                        "APPLE_CLOCK_SKEW_SECONDS must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;
                if value > MAX_CLOCK_SKEW.as_secs() {
                    return Err(ConfigError::InvalidClockSkew(format!(
                        "APPLE_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                        MAX_CLOCK_SKEW.as_secs()
                    )));
                }
                Some(Duration::from_secs(value))
            }
        };

        Ok(Self {
            key_id,
            client_id,
            team_id,
            private_key_path,
            base_url,
            redirect_uri,
            clock_skew,
        })
    }

    /// Read the private key and assemble the signing credential.
    pub fn load_credential(&self) -> Result<SigningCredential, ConfigError> {
        let pem = std::fs::read_to_string(&self.private_key_path).map_err(|e| {
            ConfigError::PrivateKey {
                path: self.private_key_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(SigningCredential::new(
            self.key_id.clone(),
            self.client_id.clone(),
            self.team_id.clone(),
            SecretString::from(pem),
        ))
    }

    /// Library configuration for this CLI run.
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new().with_base_url(self.base_url.clone());
        match self.clock_skew {
            Some(skew) => config.with_clock_skew(skew),
            None => config,
        }
    }
}
