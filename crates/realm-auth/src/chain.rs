use jose_core::{Jwk, JwsEnvelope};
use thiserror::Error;

use crate::documents::Certificate;

/// Errors raised while walking a certificate chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("certificate link {depth}: {reason}")]
    BadLink { depth: usize, reason: String },

    #[error("certificate link {depth} has expired")]
    Expired { depth: usize },

    #[error("certificate link {depth}: signing key does not match issuer")]
    IssuerMismatch { depth: usize },

    #[error("certificate chain exceeds maximum depth {max_depth}")]
    TooDeep { max_depth: usize },
}

/// Verify a certificate chain and return its effective issuer key.
///
/// Each link is a compact JWS over a [`Certificate`] document; the next link
/// toward the root rides in the document's `@certificate` field. A link must
/// verify against its own embedded key, be unexpired, and — when it names an
/// issuer — have been signed by that issuer. The effective issuer is the
/// first link's issuer (falling back to its signing key when absent).
pub fn verify_certificate_chain(compact: &str, max_depth: usize) -> Result<Jwk, ChainError> {
    let mut current = compact.to_string();
    let mut effective: Option<Jwk> = None;

    for depth in 0..max_depth {
        let envelope = JwsEnvelope::parse_compact(&current).map_err(|e| ChainError::BadLink {
            depth,
            reason: e.to_string(),
        })?;

        let signer = envelope
            .signer()
            .cloned()
            .ok_or_else(|| ChainError::BadLink {
                depth,
                reason: "no public key embedded in certificate signature".to_string(),
            })?;

        let payload = envelope
            .verify_embedded()
            .map_err(|e| ChainError::BadLink {
                depth,
                reason: e.to_string(),
            })?;

        let cert: Certificate =
            serde_json::from_slice(payload).map_err(|e| ChainError::BadLink {
                depth,
                reason: format!("certificate document: {e}"),
            })?;

        if cert.has_expired() {
            return Err(ChainError::Expired { depth });
        }

        if let Some(issuer) = &cert.issuer {
            if issuer.thumbprint() != signer.thumbprint() {
                return Err(ChainError::IssuerMismatch { depth });
            }
        }

        if effective.is_none() {
            effective = Some(cert.issuer.clone().unwrap_or(signer));
        }

        match cert.certificate {
            Some(next) => current = next,
            // End of chain; effective is set on the first iteration.
            None => return Ok(effective.expect("first link sets the issuer")),
        }
    }

    Err(ChainError::TooDeep { max_depth })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::CERTIFICATE_TYPE;
    use chrono::{Duration, Utc};
    use jose_core::{sign_compact, SigningKey};

    fn generate_key() -> SigningKey {
        SigningKey::generate(&mut rand::thread_rng())
    }

    fn certificate(
        issuer: &SigningKey,
        subject: &SigningKey,
        ttl: i64,
        next: Option<String>,
    ) -> Certificate {
        Certificate {
            doc_type: CERTIFICATE_TYPE.to_string(),
            timestamp: Utc::now(),
            id: None,
            certificate: next,
            ttl,
            issuer: Some(Jwk::from_verifying_key(&issuer.verifying_key())),
            subject: Some(Jwk::from_verifying_key(&subject.verifying_key())),
            document_types: vec!["*".to_string()],
            key_level: 10,
        }
    }

    fn sign_certificate(cert: &Certificate, key: &SigningKey) -> String {
        sign_compact(&serde_json::to_vec(cert).unwrap(), key).unwrap()
    }

    #[test]
    fn single_link_yields_issuer() {
        let issuer = generate_key();
        let subject = generate_key();

        let cert = certificate(&issuer, &subject, 600, None);
        let compact = sign_certificate(&cert, &issuer);

        let effective = verify_certificate_chain(&compact, 10).unwrap();
        assert_eq!(
            effective.thumbprint(),
            Jwk::from_verifying_key(&issuer.verifying_key()).thumbprint()
        );
    }

    #[test]
    fn two_link_chain_yields_first_issuer() {
        let root = generate_key();
        let intermediate = generate_key();
        let leaf = generate_key();

        let inner = certificate(&root, &intermediate, 600, None);
        let inner_compact = sign_certificate(&inner, &root);

        let outer = certificate(&intermediate, &leaf, 600, Some(inner_compact));
        let outer_compact = sign_certificate(&outer, &intermediate);

        let effective = verify_certificate_chain(&outer_compact, 10).unwrap();
        assert_eq!(
            effective.thumbprint(),
            Jwk::from_verifying_key(&intermediate.verifying_key()).thumbprint()
        );
    }

    #[test]
    fn expired_link_is_rejected() {
        let issuer = generate_key();
        let subject = generate_key();

        let mut cert = certificate(&issuer, &subject, 60, None);
        cert.timestamp = Utc::now() - Duration::seconds(120);
        let compact = sign_certificate(&cert, &issuer);

        assert!(matches!(
            verify_certificate_chain(&compact, 10),
            Err(ChainError::Expired { depth: 0 })
        ));
    }

    #[test]
    fn signer_must_match_named_issuer() {
        let issuer = generate_key();
        let impostor = generate_key();
        let subject = generate_key();

        let cert = certificate(&issuer, &subject, 600, None);
        let compact = sign_certificate(&cert, &impostor);

        assert!(matches!(
            verify_certificate_chain(&compact, 10),
            Err(ChainError::IssuerMismatch { depth: 0 })
        ));
    }

    #[test]
    fn depth_bound_is_enforced() {
        let key = generate_key();

        // A self-referential chain of depth 3 against a bound of 2.
        let inner = certificate(&key, &key, 600, None);
        let inner_compact = sign_certificate(&inner, &key);
        let middle = certificate(&key, &key, 600, Some(inner_compact));
        let middle_compact = sign_certificate(&middle, &key);
        let outer = certificate(&key, &key, 600, Some(middle_compact));
        let outer_compact = sign_certificate(&outer, &key);

        assert!(matches!(
            verify_certificate_chain(&outer_compact, 2),
            Err(ChainError::TooDeep { max_depth: 2 })
        ));
        assert!(verify_certificate_chain(&outer_compact, 3).is_ok());
    }

    #[test]
    fn garbage_is_a_bad_link() {
        assert!(matches!(
            verify_certificate_chain("not-a-jws", 10),
            Err(ChainError::BadLink { depth: 0, .. })
        ));
    }
}
