use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

use crate::error::JoseError;
use crate::jwk::Jwk;

/// Protected header of a compact JWS produced or consumed by this system.
///
/// The signer's public key travels embedded in the header; verification
/// against a *trusted* key is done by the caller comparing thumbprints after
/// the envelope has been checked against its own embedded key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
}

/// A parsed compact JWS (`base64url(header).base64url(payload).base64url(sig)`).
#[derive(Debug, Clone)]
pub struct JwsEnvelope {
    header: Header,
    signing_input: String,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl JwsEnvelope {
    /// Parse the three-segment compact serialization without verifying it.
    pub fn parse_compact(token: &str) -> Result<Self, JoseError> {
        let mut segments = token.split('.');
        let (h64, p64, s64) = match (segments.next(), segments.next(), segments.next()) {
            (Some(h), Some(p), Some(s)) if segments.next().is_none() => (h, p, s),
            _ => return Err(JoseError::Malformed("expected three dot-separated segments".into())),
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(h64)
            .map_err(|e| JoseError::Malformed(format!("header segment: {e}")))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|e| JoseError::Malformed(format!("header JSON: {e}")))?;

        let payload = URL_SAFE_NO_PAD
            .decode(p64)
            .map_err(|e| JoseError::Malformed(format!("payload segment: {e}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(s64)
            .map_err(|e| JoseError::Malformed(format!("signature segment: {e}")))?;

        Ok(Self {
            header,
            signing_input: format!("{h64}.{p64}"),
            payload,
            signature,
        })
    }

    /// The public key embedded in the protected header, if any.
    pub fn signer(&self) -> Option<&Jwk> {
        self.header.jwk.as_ref()
    }

    /// Verify against the header's own embedded key and return the payload.
    ///
    /// This proves possession of the embedded key only; trust decisions are
    /// made separately by thumbprint comparison.
    pub fn verify_embedded(&self) -> Result<&[u8], JoseError> {
        let jwk = self.header.jwk.as_ref().ok_or(JoseError::NoEmbeddedKey)?;
        self.verify_with(jwk)
    }

    /// Verify against the given key and return the payload.
    pub fn verify_with(&self, key: &Jwk) -> Result<&[u8], JoseError> {
        let verifying_key = key.verifying_key()?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| JoseError::Malformed(format!("signature bytes: {e}")))?;

        verifying_key
            .verify(self.signing_input.as_bytes(), &signature)
            .map_err(|_| JoseError::BadSignature)?;

        Ok(&self.payload)
    }
}

/// Sign `payload` with `key`, embedding the public JWK in the protected
/// header, and return the compact serialization.
pub fn sign_compact(payload: &[u8], key: &SigningKey) -> Result<String, JoseError> {
    let header = Header {
        alg: "EdDSA".to_string(),
        jwk: Some(Jwk::from_verifying_key(&key.verifying_key())),
    };

    let h64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let p64 = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{h64}.{p64}");
    let signature = key.sign(signing_input.as_bytes());

    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_key() -> SigningKey {
        SigningKey::generate(&mut rand::thread_rng())
    }

    #[test]
    fn sign_parse_verify_roundtrip() {
        let key = generate_key();
        let compact = sign_compact(b"{\"hello\":\"world\"}", &key).unwrap();

        let envelope = JwsEnvelope::parse_compact(&compact).unwrap();
        assert!(envelope.signer().is_some());

        let payload = envelope.verify_embedded().unwrap();
        assert_eq!(payload, b"{\"hello\":\"world\"}");
    }

    #[test]
    fn embedded_key_matches_signer() {
        let key = generate_key();
        let compact = sign_compact(b"payload", &key).unwrap();
        let envelope = JwsEnvelope::parse_compact(&compact).unwrap();

        let expected = Jwk::from_verifying_key(&key.verifying_key());
        assert_eq!(envelope.signer().unwrap().thumbprint(), expected.thumbprint());
    }

    #[test]
    fn tampered_payload_fails() {
        let key = generate_key();
        let compact = sign_compact(b"original", &key).unwrap();

        let mut parts: Vec<&str> = compact.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(b"tampered");
        parts[1] = &forged;
        let tampered = parts.join(".");

        let envelope = JwsEnvelope::parse_compact(&tampered).unwrap();
        assert!(matches!(envelope.verify_embedded(), Err(JoseError::BadSignature)));
    }

    #[test]
    fn wrong_key_fails() {
        let key = generate_key();
        let other = generate_key();
        let compact = sign_compact(b"payload", &key).unwrap();

        let envelope = JwsEnvelope::parse_compact(&compact).unwrap();
        let other_jwk = Jwk::from_verifying_key(&other.verifying_key());
        assert!(matches!(envelope.verify_with(&other_jwk), Err(JoseError::BadSignature)));
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!(
            JwsEnvelope::parse_compact("only.two"),
            Err(JoseError::Malformed(_))
        ));
        assert!(matches!(
            JwsEnvelope::parse_compact("a.b.c.d"),
            Err(JoseError::Malformed(_))
        ));
    }

    #[test]
    fn missing_embedded_key_is_detected() {
        // Hand-build a compact JWS whose header carries no jwk.
        let key = generate_key();
        let h64 = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"EdDSA\"}");
        let p64 = URL_SAFE_NO_PAD.encode(b"payload");
        let input = format!("{h64}.{p64}");
        let sig = key.sign(input.as_bytes());
        let compact = format!("{input}.{}", URL_SAFE_NO_PAD.encode(sig.to_bytes()));

        let envelope = JwsEnvelope::parse_compact(&compact).unwrap();
        assert!(envelope.signer().is_none());
        assert!(matches!(envelope.verify_embedded(), Err(JoseError::NoEmbeddedKey)));
    }
}
