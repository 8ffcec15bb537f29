//! Library surface of the hass-tunnel binary: configuration, identity,
//! the local-origin client, and the [`OriginBridge`] implementation that
//! ties mandate verification to Home Assistant forwarding.
//!
//! [`OriginBridge`]: tunnel_client::OriginBridge

pub mod config;
pub mod handler;
pub mod identity;
pub mod origin;
