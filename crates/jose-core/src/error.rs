use thiserror::Error;

/// Errors produced while parsing, verifying, or producing JOSE objects.
#[derive(Debug, Error)]
pub enum JoseError {
    #[error("malformed compact JWS: {0}")]
    Malformed(String),

    #[error("unsupported key type {kty}/{crv} (expected OKP/Ed25519)")]
    UnsupportedKey { kty: String, crv: String },

    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("no public key embedded in signature header")]
    NoEmbeddedKey,

    #[error("signature verification failed")]
    BadSignature,

    #[error("failed to serialize JOSE structure: {0}")]
    Serialize(#[from] serde_json::Error),
}
