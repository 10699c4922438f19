//! Argument parsing and command execution

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use keyfence::{
    Algorithm, Claims, CognitoPool, KeyProvider, TokenVerifier, VerificationError, VerifierConfig,
};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{Level, debug};
use tracing_subscriber::EnvFilter;

/// keyfence - verify JWTs against an issuer's published keys
#[derive(Parser, Debug)]
#[command(
    name = "keyfence",
    version,
    about = "Verify JSON Web Tokens against a JWKS endpoint or AWS Cognito user pool",
    long_about = "Verify JSON Web Tokens against an issuer's JSON Web Key Set.\n\n\
                  The key source is read from --config, then KEYFENCE_* environment variables \
                  (or COGNITO_USER_POOL_ID + AWS_DEFAULT_REGION), then command-line flags."
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all logging except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify a token and print its claims
    Verify {
        /// Token to verify; read from stdin when omitted or `-`.
        /// A leading `Bearer ` is accepted.
        token: Option<String>,
    },

    /// Fetch the issuer's key set and list its usable keys
    Jwks,
}

/// Where keys come from and what the token must satisfy
#[derive(Args, Debug, Default, Clone)]
pub struct SourceArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', global = true, env = "KEYFENCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// JWKS URL
    #[arg(long, global = true, conflicts_with_all = ["region", "user_pool_id"])]
    pub jwks_url: Option<String>,

    /// AWS region of the Cognito user pool
    #[arg(long, global = true, requires = "user_pool_id")]
    pub region: Option<String>,

    /// Cognito user pool id
    #[arg(long, global = true, requires = "region")]
    pub user_pool_id: Option<String>,

    /// Required `iss` claim
    #[arg(long, global = true)]
    pub issuer: Option<String>,

    /// Required `aud` claim
    #[arg(long, global = true)]
    pub audience: Option<String>,

    /// Allowed algorithms, comma separated (e.g. RS256,ES256)
    #[arg(long, global = true, value_delimiter = ',', value_parser = parse_algorithm)]
    pub algorithms: Vec<Algorithm>,

    /// Clock skew tolerance in seconds
    #[arg(long, global = true)]
    pub clock_skew: Option<u64>,

    /// JWKS fetch timeout in seconds
    #[arg(long, global = true)]
    pub fetch_timeout: Option<u64>,

    /// Permit plain-HTTP JWKS URLs on non-loopback hosts
    #[arg(long, global = true)]
    pub allow_http: bool,
}

/// Output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Readable text
    Human,
    /// Machine-readable JSON
    Json,
}

/// Result of a command, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Token valid / keys listed
    Success,
    /// Token rejected
    Rejected,
    /// Issuer keys could not be obtained
    KeySourceFailure,
}

impl Outcome {
    /// Process exit code
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Rejected => 1,
            Self::KeySourceFailure => 2,
        }
    }
}

fn parse_algorithm(value: &str) -> Result<Algorithm, String> {
    Algorithm::from_str(value.trim()).map_err(|_| format!("unknown algorithm '{value}'"))
}

impl SourceArgs {
    /// Layer file or environment configuration under the flags
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be loaded or the result is
    /// not a valid configuration.
    pub fn load(&self) -> Result<VerifierConfig> {
        let base = match &self.config {
            Some(path) => VerifierConfig::from_file(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => VerifierConfig::from_env().context("Failed to read environment")?,
        };
        let config = self.apply(base);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, mut config: VerifierConfig) -> VerifierConfig {
        if let Some(url) = &self.jwks_url {
            config.jwks_url = Some(url.clone());
            config.cognito = None;
        }
        if let (Some(region), Some(pool)) = (&self.region, &self.user_pool_id) {
            config.cognito = Some(CognitoPool::new(region, pool));
            config.jwks_url = None;
        }
        if let Some(issuer) = &self.issuer {
            config.expected_issuer = Some(issuer.clone());
        }
        if let Some(audience) = &self.audience {
            config.expected_audience = Some(audience.clone());
        }
        if !self.algorithms.is_empty() {
            config.allowed_algorithms.clone_from(&self.algorithms);
        }
        if let Some(secs) = self.clock_skew {
            config.clock_skew = Duration::from_secs(secs);
        }
        if let Some(secs) = self.fetch_timeout {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if self.allow_http {
            config.require_https = false;
        }
        config
    }
}

impl Cli {
    /// Execute the selected command
    ///
    /// # Errors
    ///
    /// Returns an error for configuration or I/O problems; token and key source
    /// failures are reported through the [`Outcome`].
    pub async fn execute(self) -> Result<Outcome> {
        self.init_tracing();

        let config = self.source.load()?;
        let endpoint = config.jwks_endpoint()?;
        debug!(jwks_url = %endpoint, "Configuration loaded");
        let verifier = TokenVerifier::from_config(&config)?;

        match self.command {
            Command::Verify { token } => {
                let raw = match token.as_deref() {
                    None | Some("-") => read_stdin().await?,
                    Some(token) => token.to_string(),
                };
                let outcome = verifier.verify(strip_bearer(&raw)).await;
                Ok(report_verification(&outcome, self.format))
            }
            Command::Jwks => list_keys(verifier.provider(), self.format).await,
        }
    }

    /// Logs go to stderr; `RUST_LOG` overrides the verbosity flags
    fn init_tracing(&self) {
        let level = if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

async fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("Failed to read token from stdin")?;
    Ok(buf)
}

/// Remove an `Authorization` header scheme if present
pub fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim_start();
    let token = match raw.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => &raw[7..],
        _ => raw,
    };
    token.trim()
}

fn report_verification(
    outcome: &Result<Claims, VerificationError>,
    format: OutputFormat,
) -> Outcome {
    match (outcome, format) {
        (Ok(claims), OutputFormat::Human) => {
            println!("Token valid");
            println!("{}", pretty(&json!(claims)));
            Outcome::Success
        }
        (Ok(claims), OutputFormat::Json) => {
            println!("{}", pretty(&json!({ "valid": true, "claims": claims })));
            Outcome::Success
        }
        (Err(e), OutputFormat::Human) => {
            println!("Token rejected ({}): {e}", e.kind());
            rejection(e)
        }
        (Err(e), OutputFormat::Json) => {
            println!(
                "{}",
                pretty(&json!({
                    "valid": false,
                    "error": e.kind(),
                    "message": e.to_string(),
                    "key_source_failure": e.is_key_source_failure(),
                }))
            );
            rejection(e)
        }
    }
}

fn rejection(e: &VerificationError) -> Outcome {
    if e.is_key_source_failure() {
        Outcome::KeySourceFailure
    } else {
        Outcome::Rejected
    }
}

async fn list_keys(provider: &KeyProvider, format: OutputFormat) -> Result<Outcome> {
    let set = match provider.refresh().await {
        Ok(set) => set,
        Err(e) => {
            eprintln!("Failed to fetch {}: {e}", provider.jwks_url());
            return Ok(Outcome::KeySourceFailure);
        }
    };

    let mut keys: Vec<_> = set.key_ids().filter_map(|kid| set.get(kid)).collect();
    keys.sort_by(|a, b| a.kid().cmp(b.kid()));

    match format {
        OutputFormat::Human => {
            println!("{} ({} keys)", provider.jwks_url(), keys.len());
            for key in &keys {
                let family = key.family().to_string();
                let alg = key
                    .algorithm()
                    .map_or_else(|| "-".to_string(), |alg| format!("{alg:?}"));
                println!("  {:<40} {family:<8} {alg}", key.kid());
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = keys
                .iter()
                .map(|key| {
                    json!({
                        "kid": key.kid(),
                        "family": key.family().to_string(),
                        "alg": key.algorithm(),
                    })
                })
                .collect();
            println!(
                "{}",
                pretty(&json!({ "jwks_url": provider.jwks_url(), "keys": entries }))
            );
        }
    }
    Ok(Outcome::Success)
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
