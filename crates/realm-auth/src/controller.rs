use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::verify::RealmBinding;

/// Errors from the one-shot realm controller registration. All of them are
/// fatal to startup.
#[derive(Debug, Error)]
pub enum RealmError {
    #[error("registration request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode registration response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// What we tell the realm controller about ourselves.
#[derive(Debug, Serialize)]
struct TunnelRegistration<'a> {
    version: &'a str,
    binding: &'a str,
    secret: &'a str,
    url: &'a str,
}

/// Client for the realm controller's tunnel registration endpoint.
#[derive(Debug, Clone)]
pub struct RealmClient {
    url: String,
    version: String,
    http: reqwest::Client,
}

impl RealmClient {
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Announce our public URL to the realm controller and receive the realm
    /// public key and allowed roles in return.
    pub async fn register(
        &self,
        our_url: &str,
        binding: &str,
        secret: &str,
    ) -> Result<RealmBinding, RealmError> {
        let request = TunnelRegistration {
            version: &self.version,
            binding,
            secret,
            url: our_url,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| RealmError::Transport {
                url: self.url.clone(),
                source,
            })?;

        let binding: RealmBinding = response.json().await.map_err(RealmError::Decode)?;

        info!(
            roles = ?binding.roles,
            realm_thumbprint = %binding.realm_key.thumbprint(),
            "registered with realm controller"
        );

        Ok(binding)
    }
}
