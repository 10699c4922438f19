//! Public keys and key sets parsed from a JWKS document
//!
//! Supports RSA (RS*/PS*), ECDSA P-256 / P-384 (ES256 / ES384) and Ed25519 (EdDSA).
//! Entries that cannot verify signatures (symmetric, encryption-only, unknown curve)
//! are skipped rather than failing the whole set, since issuers routinely publish
//! keys for other purposes alongside their signing keys.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{JwkError, KeyFetchError};

/// Upper bound on an accepted JWKS body
pub(crate) const MAX_JWKS_BYTES: usize = 1024 * 1024;

/// JSON Web Key (JWK) structure as published by the issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key Type (RSA, EC, oct, OKP)
    pub kty: String,

    /// Key ID (used for key selection)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Public Key Use (sig, enc)
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm (RS256, ES256, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Curve name (P-256, P-384, Ed25519)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// X coordinate / OKP public key (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Y coordinate (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Algorithm family of a verification key, including the curve where relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// RSA public key
    Rsa,
    /// ECDSA over NIST P-256
    EcP256,
    /// ECDSA over NIST P-384
    EcP384,
    /// EdDSA over Curve25519
    Ed25519,
}

impl KeyFamily {
    /// Whether a signature made with `alg` can be checked against this family
    pub fn supports(self, alg: Algorithm) -> bool {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => self == Self::Rsa,
            Algorithm::ES256 => self == Self::EcP256,
            Algorithm::ES384 => self == Self::EcP384,
            Algorithm::EdDSA => self == Self::Ed25519,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => false,
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::EcP256 => "EC P-256",
            Self::EcP384 => "EC P-384",
            Self::Ed25519 => "OKP Ed25519",
        })
    }
}

/// One public verification key
#[derive(Clone)]
pub struct Key {
    kid: String,
    family: KeyFamily,
    alg: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl Key {
    /// Build a verification key from a published JWK
    ///
    /// # Errors
    ///
    /// Returns [`JwkError`] when the entry has no `kid`, is not a signing key, uses an
    /// unsupported key type or curve, or lacks / carries invalid public parameters.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(JwkError::MissingKeyId)?
            .to_string();

        if let Some(key_use) = jwk.key_use.as_deref()
            && key_use != "sig"
        {
            return Err(JwkError::NotForSigning(format!("use={key_use}")));
        }

        let alg = match jwk.alg.as_deref() {
            None => None,
            Some(name) => Some(
                Algorithm::from_str(name)
                    .map_err(|_| JwkError::NotForSigning(format!("alg={name}")))?,
            ),
        };

        let (family, decoding_key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = required(jwk.n.as_deref(), "RSA", "n")?;
                let e = required(jwk.e.as_deref(), "RSA", "e")?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::InvalidParameters(e.to_string()))?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let family = match required(jwk.crv.as_deref(), "EC", "crv")? {
                    "P-256" => KeyFamily::EcP256,
                    "P-384" => KeyFamily::EcP384,
                    other => {
                        return Err(JwkError::UnsupportedCurve {
                            crv: other.to_string(),
                        });
                    }
                };
                let x = required(jwk.x.as_deref(), "EC", "x")?;
                let y = required(jwk.y.as_deref(), "EC", "y")?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::InvalidParameters(e.to_string()))?;
                (family, key)
            }
            "OKP" => {
                let crv = required(jwk.crv.as_deref(), "OKP", "crv")?;
                if crv != "Ed25519" {
                    return Err(JwkError::UnsupportedCurve {
                        crv: crv.to_string(),
                    });
                }
                let x = required(jwk.x.as_deref(), "OKP", "x")?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| JwkError::InvalidParameters(e.to_string()))?;
                (KeyFamily::Ed25519, key)
            }
            other => {
                return Err(JwkError::UnsupportedKeyType {
                    kty: other.to_string(),
                });
            }
        };

        if let Some(alg) = alg
            && !family.supports(alg)
        {
            return Err(JwkError::NotForSigning(format!(
                "alg={alg:?} does not fit a {family} key"
            )));
        }

        Ok(Self {
            kid,
            family,
            alg,
            decoding_key,
        })
    }

    /// Issuer-assigned key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm family (and curve) of this key
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm pinned by the JWK's `alg` member, if any
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
    }

    /// Whether a token declaring `alg` may be verified with this key
    ///
    /// The algorithm must fit the key family, and must equal the JWK's own `alg`
    /// when the issuer pinned one.
    pub fn accepts(&self, alg: Algorithm) -> bool {
        self.family.supports(alg) && self.alg.is_none_or(|pinned| pinned == alg)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

fn required<'a>(
    value: Option<&'a str>,
    kty: &'static str,
    param: &'static str,
) -> Result<&'a str, JwkError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(JwkError::MissingParameter { kty, param })
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Immutable snapshot of an issuer's signing keys
///
/// Replaced wholesale on refresh, never mutated in place.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: HashMap<String, Arc<Key>>,
    fetched_at: SystemTime,
    fetched_instant: Instant,
}

impl KeySet {
    /// Build a key set from already-parsed keys
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Malformed`] if two keys share a key id.
    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> Result<Self, KeyFetchError> {
        let mut map = HashMap::new();
        for key in keys {
            let kid = key.kid.clone();
            if map.insert(kid.clone(), Arc::new(key)).is_some() {
                return Err(KeyFetchError::Malformed(format!("duplicate key id '{kid}'")));
            }
        }
        Ok(Self {
            keys: map,
            fetched_at: SystemTime::now(),
            fetched_instant: Instant::now(),
        })
    }

    /// Parse a JWKS JSON document (`{"keys": [...]}`)
    ///
    /// Entries that are not usable signing keys are skipped and logged.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Malformed`] if the body is oversized, is not JSON, has
    /// no `keys` array, or publishes the same key id twice.
    pub fn from_json(body: &[u8]) -> Result<Self, KeyFetchError> {
        if body.len() > MAX_JWKS_BYTES {
            return Err(KeyFetchError::Malformed(format!(
                "document exceeds {MAX_JWKS_BYTES} bytes"
            )));
        }

        let document: JwksDocument = serde_json::from_slice(body)
            .map_err(|e| KeyFetchError::Malformed(format!("Failed to parse JWKS JSON: {e}")))?;

        let mut keys = Vec::with_capacity(document.keys.len());
        for entry in document.keys {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable JWK entry");
                    continue;
                }
            };
            match Key::from_jwk(&jwk) {
                Ok(key) => {
                    debug!(kid = %key.kid, family = %key.family, alg = ?key.alg, "Parsed JWK");
                    keys.push(key);
                }
                Err(e) => {
                    debug!(kid = ?jwk.kid, kty = %jwk.kty, error = %e, "Skipping JWK");
                }
            }
        }

        Self::from_keys(keys)
    }

    /// Look up a key by id
    pub fn get(&self, kid: &str) -> Option<Arc<Key>> {
        self.keys.get(kid).cloned()
    }

    /// Whether a key with this id is present
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Key ids in this set, in no particular order
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no usable keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wall-clock time the set was retrieved
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    /// Time elapsed since the set was retrieved
    pub fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }
}
