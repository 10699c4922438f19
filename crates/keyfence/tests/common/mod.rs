//! Common test utilities for integration tests
//!
//! A wiremock JWKS endpoint, fixed signing keys and token minting.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use keyfence::{KeyProvider, ProviderSettings, TokenVerifier};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const ISSUER: &str = "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Keyfence";
pub const AUDIENCE: &str = "test-client-id";

pub const RSA_A_PEM: &str = include_str!("../fixtures/rsa_a.pem");
pub const RSA_B_PEM: &str = include_str!("../fixtures/rsa_b.pem");
pub const EC_A_PEM: &str = include_str!("../fixtures/ec_a.pem");

const RSA_A_N: &str = "pZc0v6lv4bOCVb6l4gX-8SQ5xA-TTpWYQ9lulwf9CVO7ygDtVPI7J1j-zSJ-DuyjlUb0lu6HVTB3I0PdrYM9x7UwCydYgAPCpOPJUHeJOgyVQUrbryNUhM_5G4jZuvuTEu8sxlC_QNTgMY-3ZMKFrS0WsvwFE_DAFFpkKH_cUmBXNgt1xsgJK9kLS-Fn_zaZe5wiQ73iG8sCFtHXTXaUYRly2oHrGeaPmawEz27pB46wjzsBKTwLleDezjRMsylusAW54r1dxHdu099pFKkI391dGNpNMN7HIwNZlIFAWEhgiYF0NmMKO1bgjDmuj6KWl7ce72klztwHZt_75y8CMw";
const RSA_B_N: &str = "tW1JBVSQQk6ljqagf6r2N-yQAX_BC5G_ypndkIDrHs5E5z8oqbh15_FlIXEWUF2S8pW9mvyaHW0NdyY1RK7CEZTMD7R2uYoGJBDVSREcE6jjNJarQ-wN7xqlkws7vtQvqpG3mko_kG-voP9c8oQj5V3NybvDU_GUbKfQw0ge3EtY8T-CtGGbSqFIq53SMX6ke4qq3V4_P8GYToU46GWGi4Cpte_cE5VJDE2b13hWQ30aELz3X2dsMU1rel1qcS97Tg1KL1jTm0oqkjN4g0_Aya-2XUshtr1KwmMxZez1g4G-AhE02IFJVmv8l8jm1hTWQSRT0sS5jz5f0Gr-hDV6fw";
const EC_A_X: &str = "d_Xr_EAAxdm3p3yINIxPSDZfPZSAKyOOp6Ya45Z-__g";
const EC_A_Y: &str = "5k9W6PvftjW_NTmFyJvhtIfg15bX78Z-lT5YVcg00x0";

/// Public JWK for `rsa_a.pem`
pub fn rsa_a_jwk(kid: &str) -> Value {
    rsa_jwk(kid, RSA_A_N, Some("RS256"))
}

/// Public JWK for `rsa_b.pem`
pub fn rsa_b_jwk(kid: &str) -> Value {
    rsa_jwk(kid, RSA_B_N, Some("RS256"))
}

pub fn rsa_jwk(kid: &str, n: &str, alg: Option<&str>) -> Value {
    let mut jwk = json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "n": n,
        "e": "AQAB",
    });
    if let Some(alg) = alg {
        jwk["alg"] = json!(alg);
    }
    jwk
}

/// Public JWK for `rsa_a.pem` with no pinned algorithm
pub fn rsa_a_jwk_unpinned(kid: &str) -> Value {
    rsa_jwk(kid, RSA_A_N, None)
}

/// Public JWK for `ec_a.pem`
pub fn ec_a_jwk(kid: &str) -> Value {
    json!({
        "kty": "EC",
        "kid": kid,
        "use": "sig",
        "alg": "ES256",
        "crv": "P-256",
        "x": EC_A_X,
        "y": EC_A_Y,
    })
}

/// Mock issuer serving a JWKS document
pub struct MockJwksServer {
    pub server: MockServer,
    pub jwks_url: String,
}

impl MockJwksServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_url = format!("{}{}", server.uri(), JWKS_PATH);
        Self { server, jwks_url }
    }

    /// Serve `keys` until the mocks are reset
    pub async fn serve_keys(&self, keys: Vec<Value>) {
        self.respond(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .await;
    }

    /// Serve `keys` after `delay`
    pub async fn serve_keys_delayed(&self, keys: Vec<Value>, delay: Duration) {
        self.respond(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "keys": keys }))
                .set_delay(delay),
        )
        .await;
    }

    /// Answer every request with `status`
    pub async fn serve_status(&self, status: u16) {
        self.respond(ResponseTemplate::new(status)).await;
    }

    /// Answer with a raw body
    pub async fn serve_body(&self, body: &str) {
        self.respond(ResponseTemplate::new(200).set_body_string(body))
            .await;
    }

    /// Drop all mounted responses (the endpoint then answers 404)
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    async fn respond(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Number of JWKS requests received so far
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    pub fn provider(&self, settings: ProviderSettings) -> KeyProvider {
        KeyProvider::http(&self.jwks_url, settings).expect("Invalid JWKS URL")
    }

    /// Verifier expecting [`ISSUER`] and [`AUDIENCE`]
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.provider(ProviderSettings::default()))
            .with_issuer(ISSUER)
            .with_audience(AUDIENCE)
    }
}

/// Sign `claims` with the given PEM key, algorithm and key id
pub fn mint_token(claims: &Value, pem: &str, algorithm: Algorithm, kid: &str) -> String {
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem.as_bytes()).expect("Invalid RSA key"),
        Algorithm::ES256 | Algorithm::ES384 => {
            EncodingKey::from_ec_pem(pem.as_bytes()).expect("Invalid EC key")
        }
        other => panic!("Unsupported algorithm for test JWT: {other:?}"),
    };

    let mut header = Header::new(algorithm);
    header.typ = Some("JWT".to_string());
    header.kid = Some(kid.to_string());

    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Claims that pass every check of [`MockJwksServer::verifier`]
pub fn valid_claims() -> Value {
    let now = current_timestamp();
    json!({
        "sub": "5f2c9a1e-user",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "token_use": "id",
        "cognito:username": "alice",
        "iat": now,
        "nbf": now,
        "exp": now + 3600,
    })
}
