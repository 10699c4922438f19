//! Verified token claims
//!
//! [`Claims`] is the payload of a token that passed every check, kept as the full
//! JSON object so callers see exactly what the issuer signed. Registered claims
//! (RFC 7519 §4.1) get typed accessors; everything else is reachable through
//! [`Claims::get`] or [`Claims::deserialize_into`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim set of a verified token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Raw value of a claim
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String value of a claim, if present and a string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Issuer (`iss`)
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// Subject (`sub`)
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// Audience (`aud`), which RFC 7519 allows as a string or an array of strings
    pub fn audience(&self) -> Vec<&str> {
        match self.0.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Expiration time (`exp`)
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.time("exp")
    }

    /// Not-before time (`nbf`)
    pub fn not_before(&self) -> Option<SystemTime> {
        self.time("nbf")
    }

    /// Issued-at time (`iat`)
    pub fn issued_at(&self) -> Option<SystemTime> {
        self.time("iat")
    }

    /// Deserialize the claim set into a caller-defined type
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the claims do not fit `T`.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(Value::Object(self.0.clone()))
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// NumericDate claim in seconds since the epoch
    ///
    /// `Ok(None)` when absent, `Err(())` when present but not a finite number
    /// (`null` included).
    pub(crate) fn numeric_date(&self, name: &str) -> Result<Option<f64>, ()> {
        match self.0.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .filter(|secs| secs.is_finite())
                .map(Some)
                .ok_or(()),
        }
    }

    fn time(&self, name: &str) -> Option<SystemTime> {
        let secs = self.numeric_date(name).ok().flatten()?;
        if secs < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|offset| UNIX_EPOCH.checked_add(offset))
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Claims> for Value {
    fn from(claims: Claims) -> Self {
        Value::Object(claims.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => Claims::from(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_registered_claim_accessors() {
        let c = claims(json!({
            "iss": "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Pool",
            "sub": "5f2c",
            "aud": "client-123",
            "exp": 1_900_000_000,
            "nbf": 1_700_000_000,
            "iat": 1_700_000_000.5
        }));

        assert_eq!(
            c.issuer(),
            Some("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Pool")
        );
        assert_eq!(c.subject(), Some("5f2c"));
        assert_eq!(c.audience(), vec!["client-123"]);
        assert_eq!(
            c.expires_at(),
            Some(UNIX_EPOCH + Duration::from_secs(1_900_000_000))
        );
        assert_eq!(
            c.issued_at(),
            Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_500))
        );
    }

    #[test]
    fn test_audience_array() {
        let c = claims(json!({ "aud": ["a", 7, "b"] }));
        assert_eq!(c.audience(), vec!["a", "b"]);
        assert!(claims(json!({})).audience().is_empty());
    }

    #[test]
    fn test_numeric_date_validation() {
        let c = claims(json!({ "exp": "tomorrow", "nbf": null, "iat": 5 }));
        assert_eq!(c.numeric_date("exp"), Err(()));
        assert_eq!(c.numeric_date("nbf"), Err(()));
        assert_eq!(c.numeric_date("missing"), Ok(None));
        assert_eq!(c.numeric_date("iat"), Ok(Some(5.0)));
        assert_eq!(c.expires_at(), None);
    }

    #[test]
    fn test_deserialize_into_custom_type() {
        #[derive(Deserialize)]
        struct CognitoAccess {
            username: String,
            token_use: String,
        }

        let c = claims(json!({ "username": "alice", "token_use": "access", "extra": true }));
        let access: CognitoAccess = c.deserialize_into().unwrap();
        assert_eq!(access.username, "alice");
        assert_eq!(access.token_use, "access");
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let original = json!({ "sub": "u", "custom:tenant": "acme" });
        let c = claims(original.clone());
        assert_eq!(serde_json::to_value(&c).unwrap(), original);
        assert_eq!(Value::from(c), original);
    }
}
