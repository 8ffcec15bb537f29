use std::path::Path;

use anyhow::{Context, Result};
use jose_core::SigningKey;
use tracing::info;

/// Load the process identity keypair, generating and persisting one on
/// first run. There is no safe default identity, so any failure here is
/// fatal to startup.
pub fn load_or_create(path: &Path) -> Result<SigningKey> {
    let existed = path.exists();

    let key = jose_core::keys::load_or_create(path)
        .with_context(|| format!("identity keypair at {}", path.display()))?;

    if existed {
        info!(path = %path.display(), "loaded identity keypair");
    } else {
        info!(path = %path.display(), "generated new identity keypair");
    }

    Ok(key)
}
