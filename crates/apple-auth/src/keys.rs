//! Provider public key records and key set snapshots.
//!
//! The provider publishes its signing keys as a standard JSON Web Key Set:
//!
//! ```json
//! {"keys": [{"kty": "RSA", "kid": "W6WcOKB", "use": "sig", "alg": "RS256", "n": "...", "e": "AQAB"}]}
//! ```
//!
//! `n` and `e` are base64url (no padding) big-endian unsigned integers. Records
//! are immutable once parsed; a refresh produces a brand new [`KeySetSnapshot`].
//!
//! P-256 `EC` records (`crv`, `x`, `y`) are also understood so tokens signed by
//! an ES256 key can be checked through the same path.

use crate::error::VerifyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Key type of the provider's RSA keys.
pub const KEY_TYPE_RSA: &str = "RSA";

/// Key type of elliptic-curve keys.
pub const KEY_TYPE_EC: &str = "EC";

/// The only supported curve for `EC` records.
pub const CURVE_P256: &str = "P-256";

/// Byte length of a P-256 affine coordinate.
const P256_COORDINATE_LEN: usize = 32;

/// A single published public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    /// Key type (`RSA` for the provider's keys).
    pub kty: String,

    /// Opaque key identifier, unique within a key set.
    pub kid: String,

    /// Intended use of the key (`sig`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Signature algorithm the key is used with (e.g. `RS256`).
    #[serde(default)]
    pub alg: String,

    /// RSA modulus, base64url encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent, base64url encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate, base64url encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate, base64url encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl PublicKeyRecord {
    /// Build an RSA signing key record.
    #[must_use]
    pub fn rsa(kid: &str, alg: &str, n: &str, e: &str) -> Self {
        Self {
            kty: KEY_TYPE_RSA.to_string(),
            kid: kid.to_string(),
            key_use: Some("sig".to_string()),
            alg: alg.to_string(),
            n: Some(n.to_string()),
            e: Some(e.to_string()),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// Build a P-256 ES256 signing key record.
    #[must_use]
    pub fn ec_p256(kid: &str, x: &str, y: &str) -> Self {
        Self {
            kty: KEY_TYPE_EC.to_string(),
            kid: kid.to_string(),
            key_use: Some("sig".to_string()),
            alg: "ES256".to_string(),
            n: None,
            e: None,
            crv: Some(CURVE_P256.to_string()),
            x: Some(x.to_string()),
            y: Some(y.to_string()),
        }
    }

    /// Resolve the record into the algorithm it is pinned to and a verification key.
    ///
    /// The algorithm comes from the record, never from the token being verified.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Malformed` if the algorithm is unknown or does not
    /// match the key type, or if the key material cannot be decoded.
    pub fn decoding_key(&self) -> Result<(Algorithm, DecodingKey), VerifyError> {
        let algorithm = Algorithm::from_str(&self.alg).map_err(|_| {
            VerifyError::Malformed(format!("unsupported key algorithm {:?}", self.alg))
        })?;

        let key = match self.kty.as_str() {
            KEY_TYPE_RSA => self.rsa_decoding_key(algorithm)?,
            KEY_TYPE_EC => self.ec_decoding_key(algorithm)?,
            other => {
                return Err(VerifyError::Malformed(format!(
                    "unsupported key type {other:?}"
                )))
            }
        };

        Ok((algorithm, key))
    }

    fn rsa_decoding_key(&self, algorithm: Algorithm) -> Result<DecodingKey, VerifyError> {
        if !matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return Err(VerifyError::Malformed(format!(
                "algorithm {algorithm:?} does not match RSA key"
            )));
        }

        let n = required_field(self.n.as_deref(), "n")?;
        let e = required_field(self.e.as_deref(), "e")?;

        let modulus = decode_component(n, "n")?;
        if modulus.iter().all(|b| *b == 0) {
            return Err(VerifyError::Malformed("RSA modulus is zero".to_string()));
        }
        decode_rsa_exponent(&decode_component(e, "e")?)?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|err| VerifyError::Malformed(format!("invalid RSA key: {err}")))
    }

    fn ec_decoding_key(&self, algorithm: Algorithm) -> Result<DecodingKey, VerifyError> {
        if algorithm != Algorithm::ES256 {
            return Err(VerifyError::Malformed(format!(
                "algorithm {algorithm:?} does not match EC key"
            )));
        }
        if self.crv.as_deref() != Some(CURVE_P256) {
            return Err(VerifyError::Malformed(format!(
                "unsupported curve {:?}",
                self.crv
            )));
        }

        let x = required_field(self.x.as_deref(), "x")?;
        let y = required_field(self.y.as_deref(), "y")?;
        for (name, value) in [("x", x), ("y", y)] {
            if decode_component(value, name)?.len() != P256_COORDINATE_LEN {
                return Err(VerifyError::Malformed(format!(
                    "EC coordinate {name} has wrong length"
                )));
            }
        }

        DecodingKey::from_ec_components(x, y)
            .map_err(|err| VerifyError::Malformed(format!("invalid EC key: {err}")))
    }
}

fn required_field<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, VerifyError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| VerifyError::Malformed(format!("key record missing {name}")))
}

fn decode_component(value: &str, name: &str) -> Result<Vec<u8>, VerifyError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|err| VerifyError::Malformed(format!("key field {name} is not base64url: {err}")))
}

/// Interpret big-endian bytes as an RSA public exponent.
///
/// The exponent must be non-zero and fit a native `usize`.
///
/// # Errors
///
/// Returns `VerifyError::Malformed` on zero or overflowing exponents.
pub fn decode_rsa_exponent(bytes: &[u8]) -> Result<usize, VerifyError> {
    let significant: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(start) => bytes.get(start..).unwrap_or_default(),
        None => return Err(VerifyError::Malformed("RSA exponent is zero".to_string())),
    };

    if significant.len() > std::mem::size_of::<usize>() {
        return Err(VerifyError::Malformed(
            "RSA exponent overflows native integer".to_string(),
        ));
    }

    Ok(significant
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
}

/// Wire form of the provider's key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Published keys.
    pub keys: Vec<PublicKeyRecord>,
}

/// Immutable, timestamped set of provider keys.
///
/// Either empty (never fetched) or fully populated. Refreshes replace the whole
/// snapshot; a snapshot is never edited after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySetSnapshot {
    keys: Vec<PublicKeyRecord>,
    fetched_at: Option<DateTime<Utc>>,
}

impl KeySetSnapshot {
    /// Snapshot of a successful fetch.
    #[must_use]
    pub fn new(keys: Vec<PublicKeyRecord>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            keys,
            fetched_at: Some(fetched_at),
        }
    }

    /// Snapshot before the first fetch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            fetched_at: None,
        }
    }

    /// Keys in provider order.
    #[must_use]
    pub fn keys(&self) -> &[PublicKeyRecord] {
        &self.keys
    }

    /// When the keys were fetched, `None` for the empty snapshot.
    #[must_use]
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Time elapsed since the fetch, `None` for the empty snapshot.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.fetched_at.map(|at| now - at)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key identifiers in provider order.
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }

    /// Find the key with the given identifier.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

impl Default for KeySetSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
