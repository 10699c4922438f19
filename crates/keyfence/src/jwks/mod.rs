//! JWKS (JSON Web Key Set) fetching and caching
//!
//! - [`key`] - JWK parsing into verification keys and immutable key sets
//! - [`source`] - The [`KeySource`] seam and its HTTP implementation
//! - [`provider`] - [`KeyProvider`], the shared cache with refresh-on-miss
//!
//! # Security Considerations
//!
//! - HTTPS required for JWKS endpoints (prevents MITM), see
//!   [`VerifierConfig::validate`](crate::VerifierConfig::validate)
//! - Key ids from tokens select keys, never endpoints
//! - Refresh-on-miss handles key rotation; single-flight fetching keeps a burst of
//!   unknown key ids from turning into a burst of requests to the issuer

pub mod key;
pub mod provider;
pub mod source;

pub use key::{Jwk, Key, KeyFamily, KeySet};
pub use provider::{
    DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT, DEFAULT_REVALIDATE_BACKOFF, KeyProvider,
    ProviderSettings, ProviderStats,
};
pub use source::{HttpKeySource, KeySource};
