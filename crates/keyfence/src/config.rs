//! Verifier configuration
//!
//! A [`VerifierConfig`] names exactly one key source, either a JWKS URL or an AWS
//! Cognito user pool, plus the claim expectations and cache policy. It can be built
//! in code, loaded from `KEYFENCE_*` environment variables, or read from a TOML /
//! YAML / JSON file; both loaders go through the `config` crate.
//!
//! ```toml
//! expected_audience = "my-client-id"
//! allowed_algorithms = ["RS256"]
//! cache_ttl = 600          # seconds
//! fetch_timeout = 5        # seconds
//!
//! [cognito]
//! region = "ap-northeast-1"
//! user_pool_id = "ap-northeast-1_AbCdEf123"
//! ```

use std::path::Path;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use url::Url;

use crate::error::ConfigError;
use crate::jwks::{DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT, ProviderSettings};

/// Environment variable prefix for [`VerifierConfig::from_env`]
pub const ENV_PREFIX: &str = "KEYFENCE";

/// User pool id variable used by Cognito deployments
pub const COGNITO_USER_POOL_ID_VAR: &str = "COGNITO_USER_POOL_ID";

/// Region variable used by Cognito deployments
pub const AWS_REGION_VAR: &str = "AWS_DEFAULT_REGION";

/// An AWS Cognito user pool acting as token issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitoPool {
    /// AWS region, e.g. `us-east-1`
    pub region: String,
    /// User pool id, e.g. `us-east-1_AbCdEf123`
    pub user_pool_id: String,
}

impl CognitoPool {
    /// Create a pool reference
    pub fn new(region: impl Into<String>, user_pool_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            user_pool_id: user_pool_id.into(),
        }
    }

    /// The `iss` value Cognito puts in the pool's tokens
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    /// The pool's published key set
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }
}

/// Complete verifier configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Fully-formed JWKS URL (exclusive with `cognito`)
    pub jwks_url: Option<String>,

    /// Cognito user pool (exclusive with `jwks_url`)
    pub cognito: Option<CognitoPool>,

    /// Required `iss`; defaults to the pool's issuer when `cognito` is set
    pub expected_issuer: Option<String>,

    /// Required `aud` member
    pub expected_audience: Option<String>,

    /// Accepted signing algorithms (asymmetric only)
    pub allowed_algorithms: Vec<Algorithm>,

    /// Age after which the cached key set is revalidated
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cache_ttl: Duration,

    /// Bound on one JWKS fetch
    #[serde_as(as = "DurationSeconds<u64>")]
    pub fetch_timeout: Duration,

    /// Tolerance applied to `exp` and `nbf`
    #[serde_as(as = "DurationSeconds<u64>")]
    pub clock_skew: Duration,

    /// Minimum spacing between miss-triggered fetches (disabled when unset)
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub min_refresh_interval: Option<Duration>,

    /// Refuse plain-HTTP JWKS URLs other than loopback
    pub require_https: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            cognito: None,
            expected_issuer: None,
            expected_audience: None,
            allowed_algorithms: default_algorithms(),
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            clock_skew: Duration::ZERO,
            min_refresh_interval: None,
            require_https: true,
        }
    }
}

/// ES256, RS256, PS256
pub fn default_algorithms() -> Vec<Algorithm> {
    vec![
        Algorithm::ES256, // ECDSA P-256 (recommended)
        Algorithm::RS256, // RSA-SHA256 (Cognito, widely supported)
        Algorithm::PS256, // RSA-PSS (modern RSA)
    ]
}

pub(crate) fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

impl VerifierConfig {
    /// Configuration for a fixed JWKS URL
    pub fn for_jwks_url(url: impl Into<String>) -> Self {
        Self {
            jwks_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Configuration for a Cognito user pool
    pub fn for_cognito(region: impl Into<String>, user_pool_id: impl Into<String>) -> Self {
        Self {
            cognito: Some(CognitoPool::new(region, user_pool_id)),
            ..Self::default()
        }
    }

    /// Load from `KEYFENCE_*` environment variables
    ///
    /// Nested keys use a double underscore (`KEYFENCE_COGNITO__REGION`), lists are
    /// comma separated (`KEYFENCE_ALLOWED_ALGORITHMS=RS256,ES256`), durations are
    /// seconds. When `COGNITO_USER_POOL_ID` and `AWS_DEFAULT_REGION` are both set
    /// they supply the Cognito pool unless `KEYFENCE_*` variables override it.
    ///
    /// The result is not validated; see [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// [`from_env`](Self::from_env) over an explicit variable map
    pub(crate) fn from_vars(vars: config::Map<String, String>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let (Some(pool), Some(region)) =
            (vars.get(COGNITO_USER_POOL_ID_VAR), vars.get(AWS_REGION_VAR))
            && !vars.contains_key(&format!("{ENV_PREFIX}_JWKS_URL"))
        {
            builder = builder
                .set_default("cognito.region", region.as_str())?
                .set_default("cognito.user_pool_id", pool.as_str())?;
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_algorithms")
                    .source(Some(vars)),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load from a TOML, YAML or JSON file (format chosen by extension)
    ///
    /// The result is not validated; see [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file is missing or does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// The one JWKS URL keys will be fetched from
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKeySource`] / [`ConfigError::ConflictingKeySource`]
    /// unless exactly one of `jwks_url` and `cognito` is set.
    pub fn jwks_endpoint(&self) -> Result<String, ConfigError> {
        match (&self.jwks_url, &self.cognito) {
            (Some(url), None) => Ok(url.clone()),
            (None, Some(pool)) => Ok(pool.jwks_url()),
            (None, None) => Err(ConfigError::MissingKeySource),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingKeySource),
        }
    }

    /// Issuer the `iss` claim must equal, if any
    pub fn effective_issuer(&self) -> Option<String> {
        self.expected_issuer
            .clone()
            .or_else(|| self.cognito.as_ref().map(CognitoPool::issuer))
    }

    /// Cache policy for the key provider
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            cache_ttl: self.cache_ttl,
            fetch_timeout: self.fetch_timeout,
            min_refresh_interval: self.min_refresh_interval,
        }
    }

    /// Check the configuration is complete and safe
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a missing / conflicting / unparseable / insecure
    /// key source, an empty or symmetric algorithm list, or a zero fetch timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.jwks_endpoint()?;
        let url = Url::parse(&endpoint).map_err(|e| ConfigError::InvalidUrl {
            url: endpoint.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "https" => {}
            "http" if !self.require_https || is_loopback(&url) => {}
            "http" => return Err(ConfigError::InsecureUrl(endpoint)),
            other => {
                return Err(ConfigError::InvalidUrl {
                    url: endpoint.clone(),
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        }

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::EmptyAlgorithmList);
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .copied()
            .find(|alg| is_symmetric(*alg))
        {
            return Err(ConfigError::SymmetricAlgorithm(alg));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroFetchTimeout);
        }
        Ok(())
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(host)) => host == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
