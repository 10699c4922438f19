//! Error types for key fetching, key lookup, token verification and configuration
//!
//! Errors fall in two groups that callers are expected to treat differently:
//!
//! - **Token errors** mean the presented token must be rejected. They are never
//!   retried and usually map to `401 Unauthorized`.
//! - **Key source errors** ([`VerificationError::KeyFetchFailed`],
//!   [`VerificationError::KeyFetchTimeout`]) mean the issuer's JWKS endpoint could not
//!   be consulted. Operators care about these; the caller's token may well be fine.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Result alias for token verification
pub type VerifyResult<T> = std::result::Result<T, VerificationError>;

/// Failure to obtain a key set from the issuer's JWKS endpoint
///
/// `Clone` so a single in-flight fetch can hand the same outcome to every
/// coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFetchError {
    /// The endpoint could not be reached (DNS, connect, TLS, reset)
    #[error("JWKS endpoint unreachable: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status
    #[error("JWKS endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code returned by the endpoint
        status: u16,
    },

    /// The body was not a JSON Web Key Set
    #[error("Invalid JWKS document: {0}")]
    Malformed(String),

    /// The fetch did not complete within the configured timeout
    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// A single JWK entry that cannot be used for signature verification
///
/// These never fail a whole key set; the entry is skipped and logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JwkError {
    /// Entry has no `kid` and can therefore never be selected by a token
    #[error("JWK has no key id")]
    MissingKeyId,

    /// Key type other than RSA, EC or OKP (e.g. symmetric `oct`)
    #[error("Unsupported key type: {kty}")]
    UnsupportedKeyType {
        /// The unsupported key type
        kty: String,
    },

    /// EC / OKP curve we do not verify with
    #[error("Unsupported curve: {crv}")]
    UnsupportedCurve {
        /// The unsupported curve name
        crv: String,
    },

    /// Entry is marked for encryption (`use: enc`) or declares a non-signing `alg`
    #[error("JWK is not a signing key: {0}")]
    NotForSigning(String),

    /// A required public parameter is absent
    #[error("{kty} key missing '{param}' parameter")]
    MissingParameter {
        /// Key type of the entry
        kty: &'static str,
        /// Name of the missing parameter
        param: &'static str,
    },

    /// Parameters present but rejected by the crypto backend
    #[error("Invalid key parameters: {0}")]
    InvalidParameters(String),
}

/// Outcome of [`KeyProvider::key_for`](crate::jwks::KeyProvider::key_for) when no key
/// could be returned
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyLookupError {
    /// The key id is absent from the key set, even after a refresh
    #[error("Key not found: {kid}")]
    NotFound {
        /// The key id that was not found
        kid: String,
    },

    /// The refresh needed to resolve the key id failed
    #[error(transparent)]
    Fetch(#[from] KeyFetchError),
}

/// Reason a token was not accepted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// Not a three-part compact JWS, or header / payload not decodable JSON
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// `none`, an unsigned token, or an algorithm outside the allow-list
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token's key id is not published by the issuer
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// Key id declared in the token header
        kid: String,
    },

    /// Signature does not verify, or the declared algorithm does not fit the key
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// `exp` is not in the future
    #[error("Token expired")]
    TokenExpired,

    /// `nbf` is in the future
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// `iss` differs from the configured issuer
    #[error("Issuer mismatch: expected {expected}, found {found:?}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer carried by the token, if any
        found: Option<String>,
    },

    /// `aud` does not contain the configured audience
    #[error("Audience mismatch: expected {expected}")]
    AudienceMismatch {
        /// Configured audience
        expected: String,
    },

    /// The JWKS endpoint failed while resolving the token's key
    #[error("Key fetch failed: {0}")]
    KeyFetchFailed(#[source] KeyFetchError),

    /// The JWKS endpoint did not answer in time while resolving the token's key
    #[error("Key fetch timed out after {0:?}")]
    KeyFetchTimeout(Duration),
}

impl VerificationError {
    /// Stable, machine-readable code for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::UnknownSigningKey { .. } => "unknown_signing_key",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::KeyFetchFailed(_) => "key_fetch_failed",
            Self::KeyFetchTimeout(_) => "key_fetch_timeout",
        }
    }

    /// Whether the failure lies with the issuer's key endpoint rather than the token
    ///
    /// HTTP layers typically answer these with `503` instead of `401`.
    pub fn is_key_source_failure(&self) -> bool {
        matches!(self, Self::KeyFetchFailed(_) | Self::KeyFetchTimeout(_))
    }
}

impl From<KeyLookupError> for VerificationError {
    fn from(err: KeyLookupError) -> Self {
        match err {
            KeyLookupError::NotFound { kid } => Self::UnknownSigningKey { kid },
            KeyLookupError::Fetch(KeyFetchError::Timeout(after)) => Self::KeyFetchTimeout(after),
            KeyLookupError::Fetch(other) => Self::KeyFetchFailed(other),
        }
    }
}

/// Invalid or incomplete verifier configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a JWKS URL nor a Cognito user pool was configured
    #[error("No key source configured: set jwks_url or cognito.region + cognito.user_pool_id")]
    MissingKeySource,

    /// Both a JWKS URL and a Cognito user pool were configured
    #[error("Conflicting key sources: jwks_url and cognito are mutually exclusive")]
    ConflictingKeySource,

    /// The JWKS URL does not parse
    #[error("Invalid JWKS URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Plain HTTP to a non-loopback host while HTTPS is required
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for localhost): {0}")]
    InsecureUrl(String),

    /// The algorithm allow-list is empty
    #[error("At least one signing algorithm must be allowed")]
    EmptyAlgorithmList,

    /// A symmetric algorithm was put on the allow-list
    #[error("Algorithm {0:?} is symmetric and cannot be verified against a public key set")]
    SymmetricAlgorithm(Algorithm),

    /// A zero fetch timeout would fail every refresh
    #[error("fetch_timeout must be greater than zero")]
    ZeroFetchTimeout,

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// Loading from the environment or a file failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
