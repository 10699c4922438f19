//! # Keyfence - JWKS-backed JWT verification
//!
//! Verifies signed JSON Web Tokens against an issuer's published JSON Web Key Set,
//! with a shared key cache that refreshes on an unknown key id, coalesces concurrent
//! refreshes into a single fetch, and keeps serving the last good key set when the
//! issuer is unreachable.
//!
//! ## Architecture
//!
//! - [`jwks`] - Key parsing, the [`KeySource`](jwks::KeySource) seam and the shared
//!   [`KeyProvider`] cache
//! - [`verifier`] - [`TokenVerifier`], the gate sequence from raw token to [`Claims`]
//! - [`config`] - [`VerifierConfig`], loadable from env or file, incl. AWS Cognito pools
//! - [`error`] - Token errors vs key source errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyfence::{TokenVerifier, VerifierConfig};
//!
//! # tokio_test::block_on(async {
//! let mut config = VerifierConfig::for_cognito("us-east-1", "us-east-1_Example");
//! config.expected_audience = Some("my-app-client-id".to_string());
//!
//! // Build once, share everywhere: clones reuse the same key cache
//! let verifier = TokenVerifier::from_config(&config)?;
//!
//! let claims = verifier.verify("eyJraWQiOi...").await?;
//! println!("subject: {:?}", claims.subject());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! ## Security
//!
//! - `alg: none` and unsigned tokens are always rejected
//! - An explicit algorithm allow-list is always applied; HMAC algorithms cannot be
//!   allowed, closing RSA/HMAC key confusion
//! - The declared algorithm must fit the key's family and curve, and the key's own
//!   `alg` when it publishes one
//! - The JWKS URL is fixed at construction and must be HTTPS outside loopback
//!
//! ## Feature Flags
//!
//! - `metrics` - Record fetch, lookup and verification counters via the `metrics` crate

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod claims;
pub mod config;
pub mod error;
pub mod jwks;
pub mod metrics;
pub mod token;
pub mod verifier;

pub use claims::Claims;
pub use config::{CognitoPool, VerifierConfig};
pub use error::{
    ConfigError, JwkError, KeyFetchError, KeyLookupError, VerificationError, VerifyResult,
};
pub use jwks::{KeyProvider, ProviderSettings, ProviderStats};
pub use metrics::init_metrics;
pub use verifier::TokenVerifier;

/// Re-exported so callers can build allow-lists without depending on `jsonwebtoken`
pub use jsonwebtoken::Algorithm;
