use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use jose_core::Jwk;
use serde::{Deserialize, Serialize};

/// Base URI for mandate document schemas.
pub const SCHEMA_BASE: &str = "https://schema.brickchain.com/v2";

/// Schema URI of [`MandateToken`].
pub const MANDATE_TOKEN_TYPE: &str = "https://schema.brickchain.com/v2/mandate-token.json";

/// Schema URI of [`Mandate`].
pub const MANDATE_TYPE: &str = "https://schema.brickchain.com/v2/mandate.json";

/// Schema URI of [`Certificate`].
pub const CERTIFICATE_TYPE: &str = "https://schema.brickchain.com/v2/certificate.json";

/// Short-lived self-signed bearer wrapper carrying zero or more mandates.
///
/// The token is valid for `[timestamp, timestamp + ttl)`. An empty mandate
/// list is legal — the tunnel registration token is exactly that: proof of
/// key possession bound to a usage URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateToken {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@certificate", default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Compact-JWS mandate strings, each an independent signed document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mandates: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Lifetime in seconds from `timestamp`.
    #[serde(default)]
    pub ttl: i64,
}

impl MandateToken {
    pub fn new(mandates: Vec<String>, uri: impl Into<String>, ttl: i64) -> Self {
        Self {
            doc_type: MANDATE_TOKEN_TYPE.to_string(),
            timestamp: Utc::now(),
            id: None,
            certificate: None,
            mandates,
            uri: uri.into(),
            ttl,
        }
    }

    /// End of the token's validity window.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.timestamp + Duration::seconds(self.ttl)
    }
}

/// A signed capability: `recipient` holds `role` within the validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@certificate", default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(rename = "roleName", default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(rename = "validFrom", default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(rename = "validUntil", default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl Mandate {
    pub fn new(role: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            doc_type: MANDATE_TYPE.to_string(),
            timestamp: now,
            id: None,
            certificate: None,
            role: role.into(),
            role_name: None,
            valid_from: Some(now),
            valid_until: None,
            recipient: None,
            sender: None,
            params: HashMap::new(),
        }
    }
}

/// A mandate together with the key that actually signed it — the issuer of
/// its certificate chain when one is present, otherwise the bare signature
/// key.
#[derive(Debug, Clone)]
pub struct AuthenticatedMandate {
    pub mandate: Mandate,
    pub signer: Jwk,
}

/// A key-delegation link: `issuer` vouches for `subject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Next link toward the root, itself a compact JWS.
    #[serde(rename = "@certificate", default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Jwk>,
    #[serde(rename = "documentTypes", default, skip_serializing_if = "Vec::is_empty")]
    pub document_types: Vec<String>,
    #[serde(rename = "keyLevel", default)]
    pub key_level: i32,
}

impl Certificate {
    pub fn has_expired(&self) -> bool {
        Utc::now() > self.timestamp + Duration::seconds(self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_serializes_schema_fields() {
        let token = MandateToken::new(vec![], "https://proxy.example.com", 60);
        let json: serde_json::Value = serde_json::to_value(&token).unwrap();

        assert_eq!(json["@type"], MANDATE_TOKEN_TYPE);
        assert_eq!(json["uri"], "https://proxy.example.com");
        assert_eq!(json["ttl"], 60);
        // Empty mandate list and absent id are omitted entirely.
        assert!(json.get("mandates").is_none());
        assert!(json.get("@id").is_none());
    }

    #[test]
    fn token_expiry_window() {
        let mut token = MandateToken::new(vec![], "uri", 60);
        token.timestamp = Utc::now() - Duration::seconds(120);
        assert!(token.expires_at() < Utc::now());

        token.timestamp = Utc::now();
        assert!(token.expires_at() > Utc::now());
    }

    #[test]
    fn mandate_roundtrips_through_json() {
        let mut mandate = Mandate::new("admin@realm");
        mandate.valid_until = Some(Utc::now() + Duration::seconds(300));

        let json = serde_json::to_string(&mandate).unwrap();
        let parsed: Mandate = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.role, "admin@realm");
        assert_eq!(parsed.valid_from, mandate.valid_from);
        assert_eq!(parsed.valid_until, mandate.valid_until);
    }

    #[test]
    fn certificate_expiry() {
        let mut cert = Certificate {
            doc_type: CERTIFICATE_TYPE.to_string(),
            timestamp: Utc::now(),
            id: None,
            certificate: None,
            ttl: 600,
            issuer: None,
            subject: None,
            document_types: vec!["*".to_string()],
            key_level: 10,
        };
        assert!(!cert.has_expired());

        cert.timestamp = Utc::now() - Duration::seconds(700);
        assert!(cert.has_expired());
    }
}
