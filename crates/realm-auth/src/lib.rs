//! Mandate-based authorization for the hass-tunnel edge.
//!
//! A *mandate* is a signed capability asserting that a recipient key holds a
//! role for a bounded time; a *mandate token* is a short-lived self-signed
//! bearer wrapper carrying one or more mandates. This crate owns:
//!
//! * the document schemas ([`MandateToken`], [`Mandate`], [`Certificate`]),
//! * bounded certificate-chain verification,
//! * the [`MandateVerifier`] that turns an `Authorization: Mandate <jws>`
//!   header (or `mandate` cookie) into an allow/deny decision plus a session
//!   deadline,
//! * the one-shot realm controller registration that yields the trusted
//!   realm key and allowed roles ([`RealmClient`]).
//!
//! Verification is two distinct passes sharing the thumbprint helper from
//! `jose-core`: the outer token is checked against its own signer (and
//! optional certificate chain), then each inner mandate is independently
//! verified and matched against the realm key, the token signer, and the
//! allowed-roles set. A broken inner mandate is skipped, never a
//! request-level error — presenting junk mandates must not lock out valid
//! ones.

mod chain;
mod controller;
mod documents;
mod verify;

pub use chain::{verify_certificate_chain, ChainError};
pub use controller::{RealmClient, RealmError};
pub use documents::{
    AuthenticatedMandate, Certificate, Mandate, MandateToken, CERTIFICATE_TYPE, MANDATE_TOKEN_TYPE,
    MANDATE_TYPE, SCHEMA_BASE,
};
pub use verify::{AccessDenied, Grant, MandateVerifier, RealmBinding};
