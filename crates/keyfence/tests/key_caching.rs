//! JWKS caching, rotation and failure behaviour over real HTTP
//!
//! These tests verify:
//! - Concurrent verifications of an uncached key share one fetch
//! - Cached keys keep verifying while the endpoint is down
//! - Fetch failures are reported as key source errors, distinct by cause
//! - Key rotation is picked up on the first unknown key id

mod common;

use std::time::Duration;

use common::*;
use jsonwebtoken::Algorithm;
use keyfence::{KeyFetchError, ProviderSettings, TokenVerifier, VerificationError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verifications_share_one_fetch() {
    let issuer = MockJwksServer::start().await;
    issuer
        .serve_keys_delayed(vec![rsa_a_jwk("rsa-a")], Duration::from_millis(200))
        .await;

    let verifier = issuer.verifier();
    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let verifier = verifier.clone();
            let token = token.clone();
            tokio::spawn(async move { verifier.verify(&token).await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(issuer.fetch_count().await, 1);
    assert_eq!(verifier.provider().stats().fetches, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unknown_keys_agree_on_one_fetch() {
    let issuer = MockJwksServer::start().await;
    issuer
        .serve_keys_delayed(vec![rsa_a_jwk("rsa-a")], Duration::from_millis(200))
        .await;

    let verifier = issuer.verifier();
    let token = mint_token(&valid_claims(), RSA_B_PEM, Algorithm::RS256, "rsa-b");

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let verifier = verifier.clone();
            let token = token.clone();
            tokio::spawn(async move { verifier.verify(&token).await })
        })
        .collect();

    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Err(VerificationError::UnknownSigningKey { .. })
        ));
    }
    assert_eq!(issuer.fetch_count().await, 1);
}

#[tokio::test]
async fn test_cached_keys_survive_endpoint_outage() {
    let issuer = MockJwksServer::start().await;
    issuer.serve_keys(vec![rsa_a_jwk("rsa-a")]).await;
    let verifier = issuer.verifier();

    let cached = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");
    verifier.verify(&cached).await.unwrap();

    // Issuer goes down
    issuer.reset().await;
    issuer.serve_status(503).await;

    assert!(verifier.verify(&cached).await.is_ok());

    let rotated = mint_token(&valid_claims(), RSA_B_PEM, Algorithm::RS256, "rsa-b");
    let err = verifier.verify(&rotated).await.unwrap_err();
    assert_eq!(
        err,
        VerificationError::KeyFetchFailed(KeyFetchError::Status { status: 503 })
    );
    assert!(err.is_key_source_failure());

    // The failed refresh did not evict the cached key
    assert!(verifier.verify(&cached).await.is_ok());
    assert!(verifier.provider().current().unwrap().contains("rsa-a"));
}

#[tokio::test]
async fn test_key_rotation_picked_up_on_miss() {
    let issuer = MockJwksServer::start().await;
    issuer.serve_keys(vec![rsa_a_jwk("2025-key")]).await;
    let verifier = issuer.verifier();

    let old = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "2025-key");
    verifier.verify(&old).await.unwrap();

    // Issuer publishes a new key alongside the old one
    issuer.reset().await;
    issuer
        .serve_keys(vec![rsa_a_jwk("2025-key"), rsa_b_jwk("2026-key")])
        .await;

    let new = mint_token(&valid_claims(), RSA_B_PEM, Algorithm::RS256, "2026-key");
    assert!(verifier.verify(&new).await.is_ok());
    assert!(verifier.verify(&old).await.is_ok());
    assert_eq!(issuer.fetch_count().await, 1);
}

#[tokio::test]
async fn test_fetch_timeout_is_reported_distinctly() {
    let issuer = MockJwksServer::start().await;
    issuer
        .serve_keys_delayed(vec![rsa_a_jwk("rsa-a")], Duration::from_secs(3))
        .await;

    let settings = ProviderSettings {
        fetch_timeout: Duration::from_millis(200),
        ..ProviderSettings::default()
    };
    let verifier = TokenVerifier::new(issuer.provider(settings));
    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");

    let started = std::time::Instant::now();
    let err = verifier.verify(&token).await.unwrap_err();

    assert_eq!(
        err,
        VerificationError::KeyFetchTimeout(Duration::from_millis(200))
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_timeout_does_not_poison_next_refresh() {
    let issuer = MockJwksServer::start().await;
    issuer
        .serve_keys_delayed(vec![rsa_a_jwk("rsa-a")], Duration::from_secs(3))
        .await;

    let settings = ProviderSettings {
        fetch_timeout: Duration::from_millis(200),
        ..ProviderSettings::default()
    };
    let verifier = TokenVerifier::new(issuer.provider(settings));
    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");

    assert!(matches!(
        verifier.verify(&token).await,
        Err(VerificationError::KeyFetchTimeout(_))
    ));

    issuer.reset().await;
    issuer.serve_keys(vec![rsa_a_jwk("rsa-a")]).await;
    assert!(verifier.verify(&token).await.is_ok());
}

#[tokio::test]
async fn test_malformed_jwks_document() {
    let issuer = MockJwksServer::start().await;
    issuer.serve_body("<html>not json</html>").await;

    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");
    assert!(matches!(
        issuer.verifier().verify(&token).await,
        Err(VerificationError::KeyFetchFailed(KeyFetchError::Malformed(_)))
    ));
}

#[tokio::test]
async fn test_oversized_jwks_document_is_refused() {
    let issuer = MockJwksServer::start().await;
    let padding = "x".repeat(2 * 1024 * 1024);
    issuer
        .serve_body(&format!(r#"{{"keys": [], "padding": "{padding}"}}"#))
        .await;

    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");
    let err = issuer.verifier().verify(&token).await.unwrap_err();
    let VerificationError::KeyFetchFailed(KeyFetchError::Malformed(msg)) = &err else {
        panic!("expected a malformed key set, got {err:?}");
    };
    assert!(msg.contains("exceeds"), "{msg}");
}

#[tokio::test]
async fn test_missing_jwks_document() {
    let issuer = MockJwksServer::start().await;
    issuer.serve_status(404).await;

    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");
    assert_eq!(
        issuer.verifier().verify(&token).await.unwrap_err(),
        VerificationError::KeyFetchFailed(KeyFetchError::Status { status: 404 })
    );
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Nothing listens on the discard port
    let verifier = TokenVerifier::new(
        keyfence::KeyProvider::http(
            "http://127.0.0.1:9/.well-known/jwks.json",
            ProviderSettings::default(),
        )
        .unwrap(),
    );
    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");

    let err = verifier.verify(&token).await.unwrap_err();
    assert!(
        matches!(
            err,
            VerificationError::KeyFetchFailed(KeyFetchError::Network(_))
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_unusable_entries_do_not_block_good_keys() {
    let issuer = MockJwksServer::start().await;
    issuer
        .serve_keys(vec![
            serde_json::json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}),
            serde_json::json!({"kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB"}),
            rsa_a_jwk("rsa-a"),
        ])
        .await;
    let verifier = issuer.verifier();

    let token = mint_token(&valid_claims(), RSA_A_PEM, Algorithm::RS256, "rsa-a");
    assert!(verifier.verify(&token).await.is_ok());

    let keys: Vec<_> = verifier
        .provider()
        .current()
        .unwrap()
        .key_ids()
        .map(str::to_string)
        .collect();
    assert_eq!(keys, vec!["rsa-a".to_string()]);
}
