use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jose_core::{Jwk, JwsEnvelope};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::chain::verify_certificate_chain;
use crate::documents::{AuthenticatedMandate, Mandate, MandateToken};

/// Maximum certificate-chain depth on the outer token.
const TOKEN_CHAIN_DEPTH: usize = 100;

/// Maximum certificate-chain depth on an inner mandate.
const MANDATE_CHAIN_DEPTH: usize = 10;

/// What the realm controller told us to trust: the realm's public key and
/// the mandate roles allowed to reach the tunnel. Immutable for the process
/// lifetime once registration has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct RealmBinding {
    #[serde(rename = "realmKey")]
    pub realm_key: Jwk,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A successful authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Latest `validUntil` over the mandates that counted; sessions must be
    /// torn down when this instant is reached.
    pub valid_until: DateTime<Utc>,
}

/// Request-level denial reasons. Failures of *individual* inner mandates are
/// not errors — they are skipped with a debug log.
#[derive(Debug, Error)]
pub enum AccessDenied {
    #[error("no mandate token in request")]
    MissingCredentials,

    #[error("broken authorization header")]
    MalformedAuthHeader,

    #[error("unknown authorization scheme {0:?}")]
    UnknownScheme(String),

    #[error("failed to parse mandate token: {0}")]
    TokenParse(String),

    #[error("mandate token signature did not verify")]
    TokenSignature,

    #[error("mandate token has expired")]
    TokenExpired,

    #[error("token certificate chain rejected: {0}")]
    CertificateChain(String),

    #[error("no mandate matches the realm, recipient, and allowed roles")]
    NoMatchingMandate,
}

/// Verifies `Authorization: Mandate <compact-jws>` bearer credentials
/// against the realm binding established at startup.
#[derive(Debug, Clone)]
pub struct MandateVerifier {
    realm_thumbprint: String,
    roles: Vec<String>,
}

impl MandateVerifier {
    pub fn new(binding: &RealmBinding) -> Self {
        Self {
            realm_thumbprint: binding.realm_key.thumbprint(),
            roles: binding.roles.clone(),
        }
    }

    /// Decide whether the request carrying `headers` may reach the local
    /// origin, and until when.
    pub fn verify(&self, headers: &HashMap<String, String>) -> Result<Grant, AccessDenied> {
        let token_string = extract_token(headers)?;
        let (user_key, token) = parse_token(&token_string)?;

        let user_thumbprint = user_key.thumbprint();
        let mut valid_until: Option<DateTime<Utc>> = None;

        for authenticated in authenticate_mandates(&token) {
            if authenticated.signer.thumbprint() != self.realm_thumbprint {
                debug!("mandate not signed by realm key, skipping");
                continue;
            }

            let recipient = match &authenticated.mandate.recipient {
                Some(recipient) => recipient,
                None => {
                    debug!("mandate has no recipient, skipping");
                    continue;
                }
            };
            if recipient.thumbprint() != user_thumbprint {
                debug!("mandate recipient does not match token signer, skipping");
                continue;
            }

            if !self.roles.contains(&authenticated.mandate.role) {
                debug!(role = %authenticated.mandate.role, "mandate role not allowed, skipping");
                continue;
            }

            // authenticate_mandates only yields mandates with a validUntil.
            if let Some(until) = authenticated.mandate.valid_until {
                if valid_until.map_or(true, |current| until > current) {
                    valid_until = Some(until);
                }
            }
        }

        valid_until
            .map(|valid_until| Grant { valid_until })
            .ok_or(AccessDenied::NoMatchingMandate)
    }
}

/// Pull the candidate token out of the request headers: the `Authorization`
/// header when present (no cookie fallback once it exists), otherwise a
/// cookie named `mandate`.
fn extract_token(headers: &HashMap<String, String>) -> Result<String, AccessDenied> {
    if let Some(authorization) = header_value(headers, "authorization") {
        let mut parts = authorization.split_whitespace();
        let (scheme, token) = match (parts.next(), parts.next()) {
            (Some(scheme), Some(token)) if parts.next().is_none() => (scheme, token),
            _ => return Err(AccessDenied::MalformedAuthHeader),
        };

        if !scheme.eq_ignore_ascii_case("mandate") {
            return Err(AccessDenied::UnknownScheme(scheme.to_string()));
        }

        return Ok(token.to_string());
    }

    if let Some(cookies) = header_value(headers, "cookie") {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == "mandate" {
                    return Ok(value.to_string());
                }
            }
        }
    }

    Err(AccessDenied::MissingCredentials)
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Token-level pass: verify the outer JWS against its own embedded key,
/// enforce the token's validity window, and resolve the effective user key
/// through the certificate chain when one is present.
fn parse_token(token_string: &str) -> Result<(Jwk, MandateToken), AccessDenied> {
    let envelope = JwsEnvelope::parse_compact(token_string)
        .map_err(|e| AccessDenied::TokenParse(e.to_string()))?;

    let signer = envelope
        .signer()
        .cloned()
        .ok_or_else(|| AccessDenied::TokenParse("no public key in token signature".to_string()))?;

    let payload = envelope
        .verify_embedded()
        .map_err(|_| AccessDenied::TokenSignature)?;

    let token: MandateToken =
        serde_json::from_slice(payload).map_err(|e| AccessDenied::TokenParse(e.to_string()))?;

    if token.expires_at() <= Utc::now() {
        return Err(AccessDenied::TokenExpired);
    }

    let user_key = match &token.certificate {
        Some(chain) => verify_certificate_chain(chain, TOKEN_CHAIN_DEPTH)
            .map_err(|e| AccessDenied::CertificateChain(e.to_string()))?,
        None => signer,
    };

    Ok((user_key, token))
}

/// Mandate-level pass: independently verify each inner mandate and pair it
/// with the key that actually signed it. Anything broken, not yet valid,
/// expired, or unbounded is skipped.
fn authenticate_mandates(token: &MandateToken) -> Vec<AuthenticatedMandate> {
    let now = Utc::now();
    let mut authenticated = Vec::new();

    for mandate_string in &token.mandates {
        let envelope = match JwsEnvelope::parse_compact(mandate_string) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "failed to parse mandate, skipping");
                continue;
            }
        };

        let signature_key = match envelope.signer() {
            Some(key) => key.clone(),
            None => {
                debug!("no signer key in mandate, skipping");
                continue;
            }
        };

        let payload = match envelope.verify_embedded() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "failed to verify mandate signature, skipping");
                continue;
            }
        };

        let mandate: Mandate = match serde_json::from_slice(payload) {
            Ok(mandate) => mandate,
            Err(e) => {
                debug!(error = %e, "failed to decode mandate document, skipping");
                continue;
            }
        };

        let valid_from = match mandate.valid_from {
            Some(valid_from) => valid_from,
            None => {
                debug!("mandate has no validFrom, skipping");
                continue;
            }
        };
        if mandate.timestamp > now || valid_from > now {
            debug!("mandate is not yet valid, skipping");
            continue;
        }
        match mandate.valid_until {
            Some(valid_until) if valid_until <= now => {
                debug!("mandate has expired, skipping");
                continue;
            }
            None => {
                debug!("mandate has no validUntil, skipping");
                continue;
            }
            Some(_) => {}
        }

        let signer = match &mandate.certificate {
            Some(chain) => match verify_certificate_chain(chain, MANDATE_CHAIN_DEPTH) {
                Ok(issuer) => issuer,
                Err(e) => {
                    debug!(error = %e, "mandate certificate chain rejected, skipping");
                    continue;
                }
            },
            None => signature_key,
        };

        authenticated.push(AuthenticatedMandate { mandate, signer });
    }

    authenticated
}
