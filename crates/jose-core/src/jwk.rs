use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::JoseError;

/// A public JSON Web Key.
///
/// Only the OKP / Ed25519 shape is produced by this crate, but keys received
/// from the outside (realm keys, mandate recipients) are deserialized as-is
/// and rejected on use if their type is unsupported. Unknown JWK members are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// base64url-encoded public key bytes.
    pub x: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// Build the JWK form of an Ed25519 verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
            kid: None,
        }
    }

    /// Decode back into a verifying key, rejecting non-Ed25519 keys.
    pub fn verifying_key(&self) -> Result<VerifyingKey, JoseError> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(JoseError::UnsupportedKey {
                kty: self.kty.clone(),
                crv: self.crv.clone(),
            });
        }

        let raw = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|e| JoseError::KeyMaterial(format!("invalid base64 in x: {e}")))?;

        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| JoseError::KeyMaterial(format!("expected 32 bytes, got {}", raw.len())))?;

        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| JoseError::KeyMaterial(format!("invalid Ed25519 point: {e}")))
    }

    /// RFC 7638 thumbprint: base64url(SHA-256) over the canonical JSON form
    /// of the required members, in lexicographic order.
    ///
    /// Thumbprint equality is the key-equality relation used everywhere in
    /// mandate verification.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            "{{\"crv\":\"{}\",\"kty\":\"{}\",\"x\":\"{}\"}}",
            self.crv, self.kty, self.x
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }
}
