//! Egress-only tunnel client toward the rendezvous proxy.
//!
//! One outbound duplex WebSocket multiplexes every remote HTTP request and
//! every remote WebSocket session as typed [`Envelope`] variants correlated
//! by id. This crate owns the connection machinery:
//!
//! * [`TunnelClient`] — dial loop with backoff, liveness supervision,
//!   mutex-serialized writes, the registration handshake, and automatic
//!   re-registration after every reconnect.
//! * [`SessionRegistry`] / [`WsBridge`] — one live local WebSocket per
//!   remote session, with a per-bridge write lock and a mandate-deadline
//!   teardown.
//! * `RequestDispatcher` — demultiplexes inbound envelopes onto their own
//!   tasks and drives HTTP replay and WebSocket bridging through the
//!   [`OriginBridge`] seam the binary implements.
//!
//! ```text
//! rendezvous proxy  <--wss-->  tunnel-client  <--ws/http-->  local origin
//!                                   |
//!                             [OriginBridge]
//! ```
//!
//! Connection errors are never fatal here; only registration failures
//! surface to the startup caller.

mod dispatch;
mod envelope;
mod registry;
mod transport;

// Re-export the primary public types at the crate root for convenience.
pub use dispatch::{HttpReply, HttpTunnelRequest, LocalFrameAction, OriginBridge};
pub use envelope::{Envelope, BINARY_FRAME, SCHEMA_BASE, TEXT_FRAME};
pub use registry::{LocalStream, SessionRegistry, WsBridge};
pub use transport::{TunnelClient, TunnelError};
