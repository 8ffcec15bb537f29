//! Ed25519 JOSE primitives for the hass-tunnel project.
//!
//! This crate is the thin cryptographic layer everything else builds on:
//!
//! * [`Jwk`] — a public JSON Web Key (OKP / Ed25519) with its canonical
//!   RFC 7638 thumbprint.
//! * [`JwsEnvelope`] — a parsed compact JWS (`header.payload.signature`)
//!   whose protected header carries the signer's public JWK, plus
//!   [`sign_compact`] to produce one.
//! * [`keys`] — identity keypair generation and PKCS#8 PEM load-or-create
//!   with owner-only file permissions.
//!
//! Signing is always `alg: EdDSA`. Documents signed elsewhere in the system
//! (mandate tokens, mandates, certificates) are opaque byte payloads here;
//! their schemas live in the `realm-auth` crate.

mod error;
mod jwk;
mod jws;
pub mod keys;

// Re-export primary public types at the crate root for convenience.
pub use error::JoseError;
pub use jwk::Jwk;
pub use jws::{sign_compact, JwsEnvelope};

// Downstream crates handle keys through these aliases so the choice of
// signature crate stays contained here.
pub use ed25519_dalek::{SigningKey, VerifyingKey};
