//! Where key sets come from
//!
//! [`KeySource`] is the seam between the caching provider and the network. The
//! provider only ever asks a source for "the" key set; a source is bound to one fixed
//! endpoint at construction, so nothing taken from a token can steer a request.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{error, info};
use url::Url;

use super::KeySet;
use super::key::MAX_JWKS_BYTES;
use crate::error::{ConfigError, KeyFetchError};

/// Fetches the current key set from an issuer
#[async_trait]
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Retrieve and parse the issuer's current key set
    ///
    /// # Errors
    ///
    /// Returns a [`KeyFetchError`] describing why no key set could be produced.
    async fn fetch(&self) -> Result<KeySet, KeyFetchError>;

    /// The endpoint this source reads from, for logging
    fn endpoint(&self) -> &str;
}

/// [`KeySource`] that GETs a fixed JWKS URL over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySource {
    /// Create a source for `url` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `url` does not parse and
    /// [`ConfigError::HttpClient`] if the TLS backend cannot be initialised.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::with_client(url, client, timeout)
    }

    /// Create a source that reuses an existing HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `url` does not parse.
    pub fn with_client(
        url: &str,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            url,
            client,
            timeout,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> KeyFetchError {
        if err.is_timeout() {
            KeyFetchError::Timeout(self.timeout)
        } else {
            KeyFetchError::Network(err.to_string())
        }
    }

    /// Read the response body, giving up as soon as it exceeds [`MAX_JWKS_BYTES`]
    async fn read_body(
        &self,
        response: &mut reqwest::Response,
    ) -> Result<Vec<u8>, KeyFetchError> {
        let oversized = || {
            error!(jwks_url = %self.url, limit = MAX_JWKS_BYTES, "JWKS body too large");
            KeyFetchError::Malformed(format!("document exceeds {MAX_JWKS_BYTES} bytes"))
        };

        let declared = response.content_length().unwrap_or(0);
        if declared > MAX_JWKS_BYTES as u64 {
            return Err(oversized());
        }

        let mut body = Vec::with_capacity(declared as usize);
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            error!(jwks_url = %self.url, error = %e, "Failed to read JWKS body");
            self.classify(&e)
        })? {
            if body.len() + chunk.len() > MAX_JWKS_BYTES {
                return Err(oversized());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<KeySet, KeyFetchError> {
        info!(jwks_url = %self.url, "Fetching JWKS from endpoint");

        let mut response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| {
                error!(jwks_url = %self.url, error = %e, "Failed to fetch JWKS");
                self.classify(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_url = %self.url, status = %status, "JWKS endpoint returned error status");
            return Err(KeyFetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = self.read_body(&mut response).await?;

        let set = KeySet::from_json(&body).inspect_err(|e| {
            error!(jwks_url = %self.url, error = %e, "Failed to parse JWKS JSON");
        })?;

        info!(
            jwks_url = %self.url,
            key_count = set.len(),
            "Successfully fetched JWKS"
        );
        Ok(set)
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}
