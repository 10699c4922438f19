//! Compact JWS parsing
//!
//! Splits `header.payload.signature`, decodes the header, and leaves the payload
//! encoded until the algorithm gate has passed. Nothing here is trusted yet: the
//! header is read only to pick an algorithm and a key id.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::claims::Claims;
use crate::error::VerificationError;

/// Decoded JOSE header fields the verifier reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm, verbatim
    #[serde(default)]
    pub alg: Option<String>,
    /// Key identifier
    #[serde(default)]
    pub kid: Option<String>,
    /// Media type
    #[serde(default)]
    pub typ: Option<String>,
}

/// A token split into its compact serialization segments
#[derive(Debug, Clone)]
pub struct CompactToken<'a> {
    header: TokenHeader,
    payload_b64: &'a str,
    signature_b64: &'a str,
}

impl<'a> CompactToken<'a> {
    /// Split a raw token and decode its header
    ///
    /// A two-segment token (`header.payload`) parses with an empty signature so the
    /// caller can reject it as unsigned rather than malformed.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::MalformedToken`] for a wrong segment count, or a
    /// header that is not base64url-encoded JSON object.
    pub fn parse(raw: &'a str) -> Result<Self, VerificationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VerificationError::MalformedToken("empty token".to_string()));
        }

        let mut segments = raw.split('.');
        let (Some(header_b64), Some(payload_b64)) = (segments.next(), segments.next()) else {
            return Err(VerificationError::MalformedToken(
                "expected header.payload.signature".to_string(),
            ));
        };
        let signature_b64 = segments.next().unwrap_or("");
        if segments.next().is_some() {
            return Err(VerificationError::MalformedToken(
                "too many segments (encrypted JWE tokens are not supported)".to_string(),
            ));
        }

        let header_json = decode_segment(header_b64, "header")?;
        let header: TokenHeader = serde_json::from_slice::<Map<String, Value>>(&header_json)
            .and_then(|map| serde_json::from_value(Value::Object(map)))
            .map_err(|e| VerificationError::MalformedToken(format!("invalid header: {e}")))?;

        Ok(Self {
            header,
            payload_b64,
            signature_b64,
        })
    }

    /// Decoded header
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// Whether the token carries a signature at all
    pub fn is_signed(&self) -> bool {
        !self.signature_b64.is_empty()
    }

    /// Decode the payload into a claim set
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::MalformedToken`] if the payload is not
    /// base64url-encoded JSON object.
    pub fn claims(&self) -> Result<Claims, VerificationError> {
        let payload = decode_segment(self.payload_b64, "payload")?;
        serde_json::from_slice::<Map<String, Value>>(&payload)
            .map(Claims::from)
            .map_err(|e| VerificationError::MalformedToken(format!("invalid payload: {e}")))
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, VerificationError> {
    if segment.is_empty() {
        return Err(VerificationError::MalformedToken(format!("empty {what}")));
    }
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerificationError::MalformedToken(format!("{what} is not base64url: {e}")))
}
