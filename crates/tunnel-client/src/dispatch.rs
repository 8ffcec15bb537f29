use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::envelope::{Envelope, BINARY_FRAME, TEXT_FRAME};
use crate::registry::{LocalStream, SessionRegistry, WsBridge};
use crate::transport::{TunnelError, TunnelShared};

/// One tunneled HTTP request, body already base64-decoded.
#[derive(Debug, Clone)]
pub struct HttpTunnelRequest {
    pub id: String,
    pub method: String,
    pub url: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The origin's answer, ready for re-envelopment.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// A bare status with a plain-text body.
    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            content_type: "text/plain".to_string(),
            body: body.into(),
        }
    }
}

/// What to do with one text frame read from the local origin.
pub enum LocalFrameAction {
    /// Wrap the given text in a `ws-message` for the remote peer.
    Forward(String),
    /// Write `to_local` to the local socket, then forward `to_remote`.
    /// Used for the in-band auth handshake.
    Exchange { to_local: String, to_remote: String },
}

/// The seam between the tunnel machinery and the local origin.
///
/// The dispatcher never talks to the local service itself — every HTTP
/// forward, WebSocket dial, authorization decision, and frame interception
/// goes through this trait, implemented by the binary.
#[async_trait]
pub trait OriginBridge: Send + Sync {
    /// Serve one tunneled HTTP request end to end (health short-circuit,
    /// authorization, forward, error mapping).
    async fn serve_http(&self, request: &HttpTunnelRequest) -> HttpReply;

    /// Authorize a tunneled WebSocket upgrade. `Ok` carries the session
    /// deadline; `Err` carries the reason reported in `ws-response`.
    async fn authorize_ws(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<DateTime<Utc>, String>;

    /// Open the local origin WebSocket for an authorized session.
    async fn dial_ws(
        &self,
        url: &str,
        query: &str,
        headers: &HashMap<String, String>,
    ) -> Result<LocalStream, String>;

    /// Inspect one text frame read from the local origin before it is
    /// wrapped for the remote peer. `first` is true exactly once per bridge.
    fn inspect_local_frame(&self, first: bool, text: &str) -> LocalFrameAction;
}

/// Routes inbound envelopes. Holds no state of its own beyond references.
pub(crate) struct RequestDispatcher {
    shared: Arc<TunnelShared>,
    registry: Arc<SessionRegistry>,
    handler: RwLock<Option<Arc<dyn OriginBridge>>>,
}

impl RequestDispatcher {
    pub(crate) fn new(shared: Arc<TunnelShared>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            shared,
            registry,
            handler: RwLock::new(None),
        }
    }

    pub(crate) fn set_handler(&self, handler: Arc<dyn OriginBridge>) {
        *self.handler.write().expect("handler slot poisoned") = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn OriginBridge>> {
        self.handler.read().expect("handler slot poisoned").clone()
    }

    /// Write a reply envelope; a failed write recycles the connection.
    async fn reply(&self, envelope: Envelope) {
        if let Err(e) = self.shared.write(&envelope).await {
            warn!(error = %e, "failed to send reply envelope");
            self.shared.trigger_reconnect();
        }
    }

    /// Handle one inbound envelope. Runs on its own task; a slow or
    /// panicking handler never stalls the tunnel or other sessions.
    pub(crate) async fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Ping { .. } => {
                // Liveness was already updated by the reader.
                debug!("ping");
            }

            Envelope::RegistrationResponse { hostname, .. } => {
                let result = match hostname {
                    Some(hostname) if !hostname.is_empty() => Ok(hostname),
                    _ => Err(TunnelError::Registration(
                        "no host in registration-response".to_string(),
                    )),
                };
                self.shared.resolve_registration(result);
            }

            Envelope::HttpRequest {
                id,
                method,
                url,
                query,
                headers,
                body,
                ..
            } => {
                self.handle_http(id, method, url, query, headers, body)
                    .await;
            }

            Envelope::WsRequest {
                id,
                url,
                query,
                headers,
                ..
            } => {
                self.handle_ws_open(id, url, query, headers).await;
            }

            Envelope::WsMessage {
                id,
                message_type,
                body,
                ..
            } => {
                self.handle_ws_message(&id, message_type, body).await;
            }

            Envelope::WsTeardown { id, .. } => {
                // Idempotent: a second teardown finds nothing to remove.
                if let Some(bridge) = self.registry.remove(&id) {
                    debug!(session = %id, "remote tore down session");
                    bridge.close_local().await;
                }
            }

            other => {
                debug!(id = %other.id(), "ignoring unexpected envelope");
            }
        }
    }

    async fn handle_http(
        &self,
        id: String,
        method: String,
        url: String,
        query: String,
        headers: HashMap<String, String>,
        body: String,
    ) {
        let Some(handler) = self.handler() else {
            error!("no handler set, can't process http-request");
            return;
        };

        let body = if body.is_empty() {
            Vec::new()
        } else {
            match BASE64.decode(&body) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, "failed to decode http-request body");
                    Vec::new()
                }
            }
        };

        let request = HttpTunnelRequest {
            id: id.clone(),
            method,
            url,
            query,
            headers,
            body,
        };

        let reply = handler.serve_http(&request).await;

        let response = Envelope::http_response(
            id,
            reply.status,
            reply.headers,
            reply.content_type,
            BASE64.encode(&reply.body),
        );

        if let Err(e) = self.shared.write(&response).await {
            warn!(error = %e, "failed to send http-response");
            self.shared.trigger_reconnect();
        }
    }

    async fn handle_ws_open(
        &self,
        id: String,
        url: String,
        query: String,
        headers: HashMap<String, String>,
    ) {
        let Some(handler) = self.handler() else {
            error!("no handler set, can't process ws-request");
            return;
        };

        let deadline = match handler.authorize_ws(&headers).await {
            Ok(deadline) => deadline,
            Err(reason) => {
                debug!(session = %id, %reason, "websocket session denied");
                self.reply(Envelope::ws_response_error(id, reason)).await;
                return;
            }
        };

        let stream = match handler.dial_ws(&url, &query, &headers).await {
            Ok(stream) => stream,
            Err(reason) => {
                error!(session = %id, %reason, "failed to dial local websocket");
                self.reply(Envelope::ws_response_error(id, reason)).await;
                return;
            }
        };

        let (sink, read) = stream.split();
        let bridge = Arc::new(WsBridge::new(id.clone(), deadline, sink));
        self.registry.insert(Arc::clone(&bridge));

        if let Err(e) = self.shared.write(&Envelope::ws_response_ok(id.as_str())).await {
            warn!(error = %e, "failed to send ws-response");
            self.registry.remove(&id);
            bridge.close_local().await;
            self.shared.trigger_reconnect();
            return;
        }

        debug!(session = %id, %deadline, "websocket session established");

        // This task stays alive as the local-to-remote pump.
        self.pump_local(bridge, read, handler).await;
    }

    /// Read frames from the local origin and wrap them in `ws-message`
    /// envelopes until the session ends: local close or error, the remote
    /// tearing the bridge down, or the mandate deadline.
    async fn pump_local(
        &self,
        bridge: Arc<WsBridge>,
        mut read: SplitStream<LocalStream>,
        handler: Arc<dyn OriginBridge>,
    ) {
        let id = bridge.id().to_string();
        let ttl = (bridge.deadline() - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let expiry = tokio::time::sleep(ttl);
        tokio::pin!(expiry);

        let mut first = true;

        loop {
            tokio::select! {
                _ = &mut expiry => {
                    debug!(session = %id, "mandate deadline reached, closing session");
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let action = handler.inspect_local_frame(first, &text);
                        first = false;

                        let outbound = match action {
                            LocalFrameAction::Forward(text) => text,
                            LocalFrameAction::Exchange { to_local, to_remote } => {
                                if let Err(e) = bridge.send_local(Message::Text(to_local)).await {
                                    debug!(session = %id, error = %e, "local write failed");
                                    break;
                                }
                                to_remote
                            }
                        };

                        if let Err(e) = self
                            .shared
                            .write(&Envelope::ws_message(id.as_str(), TEXT_FRAME, outbound))
                            .await
                        {
                            warn!(error = %e, "failed to send ws-message");
                            self.shared.trigger_reconnect();
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        first = false;
                        let body = String::from_utf8_lossy(&bytes).into_owned();
                        if let Err(e) = self
                            .shared
                            .write(&Envelope::ws_message(id.as_str(), BINARY_FRAME, body))
                            .await
                        {
                            warn!(error = %e, "failed to send ws-message");
                            self.shared.trigger_reconnect();
                            break;
                        }
                    }
                    // Control frames stay on the local leg.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session = %id, "local websocket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(session = %id, error = %e, "local websocket error");
                        break;
                    }
                }
            }
        }

        self.teardown(&bridge, &id).await;
    }

    async fn handle_ws_message(&self, id: &str, message_type: i32, body: String) {
        let Some(bridge) = self.registry.get(id) else {
            debug!(session = %id, "ws-message for unknown session");
            return;
        };

        let message = if message_type == BINARY_FRAME {
            Message::Binary(body.into_bytes())
        } else {
            Message::Text(body)
        };

        if let Err(e) = bridge.send_local(message).await {
            debug!(session = %id, error = %e, "local write failed, tearing down");
            self.teardown(&bridge, id).await;
        }
    }

    /// Close the local side and announce the teardown, exactly once per
    /// session: whoever removes the bridge from the registry sends the
    /// `ws-teardown`.
    async fn teardown(&self, bridge: &WsBridge, id: &str) {
        if self.registry.remove(id).is_some() {
            bridge.close_local().await;
            if let Err(e) = self.shared.write(&Envelope::ws_teardown(id)).await {
                debug!(session = %id, error = %e, "ws-teardown not delivered");
            }
        }
    }
}
