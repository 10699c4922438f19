//! Token verification against a JWKS-backed key provider
//!
//! [`TokenVerifier::verify`] runs a fixed sequence of gates and stops at the first
//! failure:
//!
//! 1. Structural parse (compact JWS, JSON header)
//! 2. Algorithm gate: `none`, unsigned tokens, unknown names and anything outside the
//!    allow-list are rejected before any key is looked up
//! 3. Key resolution through the shared [`KeyProvider`]
//! 4. Signature check with the declared algorithm, which must fit the key
//! 5. Time and identity claims (`exp`, `nbf`, `iss`, `aud`)
//!
//! A verifier holds no mutable state of its own; clones share the provider's cache.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use crate::claims::Claims;
use crate::config::{VerifierConfig, default_algorithms, is_symmetric};
use crate::error::{ConfigError, VerificationError, VerifyResult};
use crate::jwks::KeyProvider;
use crate::metrics;
use crate::token::CompactToken;

/// Verifies signed JWTs and returns their claims
///
/// # Example
///
/// ```rust,no_run
/// # use keyfence::{KeyProvider, TokenVerifier};
/// # tokio_test::block_on(async {
/// let provider = KeyProvider::http(
///     "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Example/.well-known/jwks.json",
///     Default::default(),
/// )?;
/// let verifier = TokenVerifier::new(provider)
///     .with_issuer("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Example")
///     .with_audience("my-app-client-id");
///
/// match verifier.verify("eyJraWQiOi...").await {
///     Ok(claims) => println!("Valid token for: {:?}", claims.subject()),
///     Err(e) if e.is_key_source_failure() => println!("Issuer unavailable: {e}"),
///     Err(e) => println!("Rejected ({}): {e}", e.kind()),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    provider: KeyProvider,
    expected_issuer: Option<String>,
    expected_audience: Option<String>,
    allowed_algorithms: Arc<[Algorithm]>,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a verifier over `provider`
    ///
    /// Defaults: algorithms ES256, RS256, PS256; no issuer or audience requirement;
    /// no clock skew.
    pub fn new(provider: KeyProvider) -> Self {
        Self {
            provider,
            expected_issuer: None,
            expected_audience: None,
            allowed_algorithms: default_algorithms().into(),
            clock_skew: Duration::ZERO,
        }
    }

    /// Build the HTTP key source, provider and verifier described by `config`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration fails
    /// [`VerifierConfig::validate`] or the HTTP client cannot be built.
    pub fn from_config(config: &VerifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let provider = KeyProvider::http(&config.jwks_endpoint()?, config.provider_settings())?;

        let mut verifier = Self::new(provider)
            .with_algorithms(config.allowed_algorithms.iter().copied())
            .with_clock_skew(config.clock_skew);
        verifier.expected_issuer = config.effective_issuer();
        verifier.expected_audience = config.expected_audience.clone();
        Ok(verifier)
    }

    /// Require `iss` to equal `issuer`
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Require `aud` to be, or contain, `audience`
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Replace the algorithm allow-list
    ///
    /// Symmetric HMAC algorithms are dropped: a public key set can never
    /// authenticate them.
    pub fn with_algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| !is_symmetric(*alg))
            .collect();
        self
    }

    /// Tolerate this much clock difference on `exp` and `nbf`
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// The key provider this verifier resolves keys through
    pub fn provider(&self) -> &KeyProvider {
        &self.provider
    }

    /// Accepted signing algorithms
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    /// Verify `raw` at the current system time
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationError`] of the first gate the token fails; see
    /// [`verify_at`](Self::verify_at).
    pub async fn verify(&self, raw: &str) -> VerifyResult<Claims> {
        self.verify_at(raw, SystemTime::now()).await
    }

    /// Verify `raw` as of `now`
    ///
    /// # Errors
    ///
    /// - [`VerificationError::MalformedToken`] - bad structure, missing `kid`, or
    ///   non-numeric `exp` / `nbf`
    /// - [`VerificationError::UnsupportedAlgorithm`] - `none`, unsigned, or not allowed
    /// - [`VerificationError::UnknownSigningKey`] - `kid` absent after one refresh
    /// - [`VerificationError::KeyFetchFailed`] / [`VerificationError::KeyFetchTimeout`] -
    ///   the refresh needed to resolve `kid` failed
    /// - [`VerificationError::InvalidSignature`] - bad signature or algorithm / key mismatch
    /// - [`VerificationError::TokenExpired`] / [`VerificationError::TokenNotYetValid`]
    /// - [`VerificationError::IssuerMismatch`] / [`VerificationError::AudienceMismatch`]
    pub async fn verify_at(&self, raw: &str, now: SystemTime) -> VerifyResult<Claims> {
        let outcome = self.run(raw, now).await;
        match &outcome {
            Ok(claims) => {
                metrics::record_verification("ok");
                debug!(subject = ?claims.subject(), "Token verified");
            }
            Err(e) => {
                metrics::record_verification(e.kind());
                debug!(reason = e.kind(), error = %e, "Token rejected");
            }
        }
        outcome
    }

    async fn run(&self, raw: &str, now: SystemTime) -> VerifyResult<Claims> {
        let token = CompactToken::parse(raw)?;
        let alg = self.check_algorithm(&token)?;
        let claims = token.claims()?;

        let kid = token
            .header()
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| VerificationError::MalformedToken("header has no kid".to_string()))?;

        let key = self.provider.key_for(kid).await?;

        if !key.accepts(alg) {
            return Err(VerificationError::InvalidSignature(format!(
                "{alg:?} cannot be used with {} key '{kid}'",
                key.family()
            )));
        }
        verify_signature(raw.trim(), key.decoding_key(), alg)?;

        self.check_claims(&claims, now)?;
        Ok(claims)
    }

    fn check_algorithm(&self, token: &CompactToken<'_>) -> VerifyResult<Algorithm> {
        let declared = token.header().alg.as_deref().unwrap_or("");
        if declared.is_empty() || declared.eq_ignore_ascii_case("none") {
            return Err(VerificationError::UnsupportedAlgorithm(format!(
                "'{declared}' is not a signing algorithm"
            )));
        }
        if !token.is_signed() {
            return Err(VerificationError::UnsupportedAlgorithm(
                "token carries no signature".to_string(),
            ));
        }

        let alg = Algorithm::from_str(declared).map_err(|_| {
            VerificationError::UnsupportedAlgorithm(format!("unknown algorithm '{declared}'"))
        })?;
        if is_symmetric(alg) || !self.allowed_algorithms.contains(&alg) {
            return Err(VerificationError::UnsupportedAlgorithm(format!(
                "{alg:?} is not allowed"
            )));
        }
        Ok(alg)
    }

    fn check_claims(&self, claims: &Claims, now: SystemTime) -> VerifyResult<()> {
        let now = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let skew = self.clock_skew.as_secs_f64();

        if let Some(exp) = numeric_date(claims, "exp")?
            && now >= exp + skew
        {
            return Err(VerificationError::TokenExpired);
        }
        if let Some(nbf) = numeric_date(claims, "nbf")?
            && nbf > now + skew
        {
            return Err(VerificationError::TokenNotYetValid);
        }

        if let Some(expected) = &self.expected_issuer {
            let found = claims.issuer();
            if found != Some(expected.as_str()) {
                return Err(VerificationError::IssuerMismatch {
                    expected: expected.clone(),
                    found: found.map(str::to_string),
                });
            }
        }

        if let Some(expected) = &self.expected_audience
            && !claims.audience().contains(&expected.as_str())
        {
            return Err(VerificationError::AudienceMismatch {
                expected: expected.clone(),
            });
        }

        Ok(())
    }
}

fn numeric_date(claims: &Claims, name: &str) -> VerifyResult<Option<f64>> {
    claims
        .numeric_date(name)
        .map_err(|()| VerificationError::MalformedToken(format!("'{name}' is not a NumericDate")))
}

/// Signature only; time and identity claims are checked separately against the
/// caller's clock.
fn verify_signature(
    raw: &str,
    key: &jsonwebtoken::DecodingKey,
    alg: Algorithm,
) -> VerifyResult<()> {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Map<String, Value>>(raw, key, &validation)
        .map(|_| ())
        .map_err(|e| VerificationError::InvalidSignature(e.to_string()))
}
