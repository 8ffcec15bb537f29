//! Identity keypair persistence.
//!
//! The process identity is a single Ed25519 keypair stored as PKCS#8 PEM.
//! It is created on first run and loaded on every run after that; a failure
//! at either step is fatal to startup, so the errors here carry enough
//! context to be the process's last log line.

use std::fs;
use std::path::Path;

use ed25519_dalek::SigningKey;
use thiserror::Error;

/// Errors raised while loading or creating the identity keypair.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse key file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("failed to encode keypair as PKCS#8 PEM: {0}")]
    Encode(String),

    #[error("failed to write key file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to restrict permissions on {path}: {source}")]
    Permissions {
        path: String,
        source: std::io::Error,
    },
}

/// Generate a fresh Ed25519 keypair.
pub fn generate() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Load the keypair at `path`, or generate one and persist it there with
/// mode 0600 if the file does not exist.
pub fn load_or_create(path: &Path) -> Result<SigningKey, KeyStoreError> {
    use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};

    if path.exists() {
        let pem = fs::read_to_string(path).map_err(|source| KeyStoreError::Read {
            path: path.display().to_string(),
            source,
        })?;

        return SigningKey::from_pkcs8_pem(&pem).map_err(|e| KeyStoreError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        });
    }

    let key = generate();
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyStoreError::Encode(e.to_string()))?;

    fs::write(path, pem.as_bytes()).map_err(|source| KeyStoreError::Write {
        path: path.display().to_string(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            KeyStoreError::Permissions {
                path: path.display().to_string(),
                source,
            }
        })?;
    }

    Ok(key)
}
