//! Verifier metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`). Without the
//! feature every recorder below compiles to nothing.
//!
//! ## Metrics Provided
//!
//! - `keyfence_jwks_fetches_total` - Counter for JWKS fetches (labels: status)
//! - `keyfence_jwks_fetch_duration_seconds` - Histogram for JWKS fetch duration
//! - `keyfence_key_lookups_total` - Counter for key lookups (labels: cache)
//! - `keyfence_verifications_total` - Counter for verification outcomes (labels: status)

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Register metric descriptions. Idempotent; call once at startup.
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "keyfence_jwks_fetches_total",
            "Total JWKS fetches by outcome"
        );
        describe_histogram!(
            "keyfence_jwks_fetch_duration_seconds",
            "JWKS fetch duration in seconds"
        );
        describe_counter!(
            "keyfence_key_lookups_total",
            "Total key lookups by cache outcome"
        );
        describe_counter!(
            "keyfence_verifications_total",
            "Total token verifications by outcome"
        );
    });
}

/// Register metric descriptions (no-op without the `metrics` feature)
#[cfg(not(feature = "metrics"))]
pub fn init_metrics() {}

#[cfg(feature = "metrics")]
pub(crate) fn record_fetch(status: &'static str, duration_seconds: f64) {
    counter!("keyfence_jwks_fetches_total", "status" => status).increment(1);
    histogram!("keyfence_jwks_fetch_duration_seconds").record(duration_seconds);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_fetch(_status: &'static str, _duration_seconds: f64) {}

#[cfg(feature = "metrics")]
pub(crate) fn record_lookup(cache: &'static str) {
    counter!("keyfence_key_lookups_total", "cache" => cache).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_lookup(_cache: &'static str) {}

/// `status` is `"ok"` or a [`VerificationError::kind`](crate::VerificationError::kind) code
#[cfg(feature = "metrics")]
pub(crate) fn record_verification(status: &'static str) {
    counter!("keyfence_verifications_total", "status" => status).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_verification(_status: &'static str) {}
