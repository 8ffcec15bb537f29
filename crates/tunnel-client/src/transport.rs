use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use jose_core::SigningKey;
use realm_auth::MandateToken;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::dispatch::{OriginBridge, RequestDispatcher};
use crate::envelope::Envelope;
use crate::registry::SessionRegistry;

/// Wait between failed dial attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Liveness supervisor wake interval.
const LIVENESS_TICK: Duration = Duration::from_secs(1);

/// A connection with no inbound traffic for this long is considered dead.
const PING_TIMEOUT: Duration = Duration::from_secs(20);

/// TTL of the self-signed registration token.
const REGISTRATION_TTL: i64 = 60;

type TunnelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type TunnelSink = SplitSink<TunnelStream, Message>;

/// Errors surfaced by the tunnel transport. Everything except registration
/// failures is transient — the dial loop keeps going.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("not connected to the rendezvous proxy")]
    NotConnected,

    #[error("tunnel write failed: {0}")]
    Write(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to sign registration token: {0}")]
    Sign(#[from] jose_core::JoseError),

    #[error("registration failed: {0}")]
    Registration(String),
}

/// Handle to the tunnel. Cheap to clone; all clones drive the same
/// connection.
#[derive(Clone)]
pub struct TunnelClient {
    shared: Arc<TunnelShared>,
    dispatcher: Arc<RequestDispatcher>,
    registry: Arc<SessionRegistry>,
}

impl TunnelClient {
    /// Start the dial loop and liveness supervisor against `endpoint`
    /// (an `http(s)://` base URL; the duplex channel lives at
    /// `/proxy/subscribe` with the scheme rewritten to `ws(s)`).
    ///
    /// The client keeps reconnecting until [`disconnect`](Self::disconnect);
    /// connection errors are never fatal.
    pub fn connect(endpoint: &str) -> Self {
        let shared = Arc::new(TunnelShared::new(endpoint));
        let registry = Arc::new(SessionRegistry::default());
        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&registry),
        ));

        tokio::spawn(run(Arc::clone(&shared), Arc::clone(&dispatcher)));
        tokio::spawn(liveness(Arc::clone(&shared)));

        Self {
            shared,
            dispatcher,
            registry,
        }
    }

    /// Install the origin seam. Envelopes arriving before this is called are
    /// logged and dropped.
    pub fn set_handler(&self, handler: Arc<dyn OriginBridge>) {
        self.dispatcher.set_handler(handler);
    }

    /// Register our identity with the rendezvous proxy and return the
    /// assigned public hostname.
    ///
    /// Blocks until the connection is up, then until the proxy answers. The
    /// key is remembered so every reconnect re-registers automatically.
    pub async fn register(&self, key: &SigningKey) -> Result<String, TunnelError> {
        self.shared.wait_connected().await;
        let hostname = register_once(&self.shared, key).await?;
        self.shared.remember_identity(key.clone());
        Ok(hostname)
    }

    /// Session registry, exposed for shutdown accounting.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Best-effort goodbye: write a `disconnect` envelope, suppress
    /// reconnection, and drop the connection and all bridges.
    pub async fn disconnect(&self) {
        if let Err(e) = self.shared.write(&Envelope::disconnect()).await {
            debug!(error = %e, "disconnect envelope not delivered");
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.registry.close_all().await;
        self.shared.trigger_reconnect();
    }

    /// Block until the transport has shut down.
    pub async fn wait(&self) {
        let mut connected = self.shared.connected_rx();
        while !self.shared.is_shutdown() {
            tokio::select! {
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(LIVENESS_TICK) => {}
            }
        }
    }
}

/// Connection state shared between the dial loop, the liveness supervisor,
/// the dispatcher, and the public handle.
pub(crate) struct TunnelShared {
    /// Original base URL, used as the registration token's `uri`.
    endpoint: String,
    /// Rewritten `ws(s)://.../proxy/subscribe` dial target.
    subscribe_url: String,
    /// Single write path; all outbound envelopes serialize through here.
    writer: tokio::sync::Mutex<Option<TunnelSink>>,
    last_ping: Mutex<Instant>,
    connected: watch::Sender<bool>,
    shutdown: AtomicBool,
    reconnect: Notify,
    pending_registration: Mutex<Option<oneshot::Sender<Result<String, TunnelError>>>>,
    identity: Mutex<Option<SigningKey>>,
}

impl TunnelShared {
    fn new(endpoint: &str) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            endpoint: endpoint.to_string(),
            subscribe_url: subscribe_url(endpoint),
            writer: tokio::sync::Mutex::new(None),
            last_ping: Mutex::new(Instant::now()),
            connected,
            shutdown: AtomicBool::new(false),
            reconnect: Notify::new(),
            pending_registration: Mutex::new(None),
            identity: Mutex::new(None),
        }
    }

    /// Serialize and send one envelope. Failing on a closed connection is a
    /// transient error; the caller decides whether to force a reconnect.
    pub(crate) async fn write(&self, envelope: &Envelope) -> Result<(), TunnelError> {
        let json = serde_json::to_string(envelope)?;
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            None => Err(TunnelError::NotConnected),
            Some(sink) => sink.send(Message::Text(json)).await.map_err(TunnelError::Write),
        }
    }

    pub(crate) fn touch_ping(&self) {
        *self.last_ping.lock().expect("liveness clock poisoned") = Instant::now();
    }

    fn ping_age(&self) -> Duration {
        self.last_ping
            .lock()
            .expect("liveness clock poisoned")
            .elapsed()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connected_rx(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn wait_connected(&self) {
        let mut rx = self.connected_rx();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wake the read loop out of its current connection.
    pub(crate) fn trigger_reconnect(&self) {
        self.reconnect.notify_one();
    }

    fn remember_identity(&self, key: SigningKey) {
        *self.identity.lock().expect("identity slot poisoned") = Some(key);
    }

    fn identity_key(&self) -> Option<SigningKey> {
        self.identity.lock().expect("identity slot poisoned").clone()
    }

    async fn install_writer(&self, sink: TunnelSink) {
        *self.writer.lock().await = Some(sink);
        self.touch_ping();
        self.connected.send_replace(true);
    }

    async fn drop_writer(&self) {
        self.connected.send_replace(false);
        self.writer.lock().await.take();
    }

    fn arm_registration(&self, tx: oneshot::Sender<Result<String, TunnelError>>) {
        *self
            .pending_registration
            .lock()
            .expect("registration slot poisoned") = Some(tx);
    }

    /// Resolve the in-flight registration, if any.
    pub(crate) fn resolve_registration(&self, result: Result<String, TunnelError>) {
        if let Some(tx) = self
            .pending_registration
            .lock()
            .expect("registration slot poisoned")
            .take()
        {
            let _ = tx.send(result);
        }
    }
}

/// Map the `http(s)` endpoint to its `ws(s)` subscribe URL.
fn subscribe_url(endpoint: &str) -> String {
    let host = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    let scheme = if endpoint.starts_with("https://") {
        "wss"
    } else {
        "ws"
    };
    format!("{scheme}://{host}/proxy/subscribe")
}

/// Build, sign, and send a registration token, then wait for the proxy's
/// answer. The connection must already be up.
async fn register_once(shared: &TunnelShared, key: &SigningKey) -> Result<String, TunnelError> {
    let token = MandateToken::new(Vec::new(), shared.endpoint.clone(), REGISTRATION_TTL);
    let compact = jose_core::sign_compact(&serde_json::to_vec(&token)?, key)?;

    let (tx, rx) = oneshot::channel();
    shared.arm_registration(tx);
    shared.write(&Envelope::registration_request(compact)).await?;

    match rx.await {
        Ok(result) => result,
        // A reconnect invalidated the registration before it resolved.
        Err(_) => Err(TunnelError::Registration(
            "connection lost during registration".to_string(),
        )),
    }
}

/// Dial loop plus inbound reader. One long-lived task.
async fn run(shared: Arc<TunnelShared>, dispatcher: Arc<RequestDispatcher>) {
    loop {
        if shared.is_shutdown() {
            return;
        }

        let stream = match connect_async(&shared.subscribe_url).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(endpoint = %shared.subscribe_url, error = %e, "failed to connect to rendezvous proxy");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        info!(endpoint = %shared.subscribe_url, "tunnel connected");

        let (sink, mut read) = stream.split();
        shared.install_writer(sink).await;

        // A reconnect after an earlier successful registration re-registers
        // by itself; the first registration is driven by the caller.
        if let Some(key) = shared.identity_key() {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                match register_once(&shared, &key).await {
                    Ok(hostname) => info!(%hostname, "re-registered with rendezvous proxy"),
                    Err(e) => {
                        warn!(error = %e, "re-registration failed");
                        shared.trigger_reconnect();
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shared.reconnect.notified() => {
                    debug!("connection recycle requested");
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(message)) => {
                        // Any inbound traffic proves the link is alive.
                        shared.touch_ping();

                        if let Message::Text(text) = message {
                            match serde_json::from_str::<Envelope>(&text) {
                                Ok(envelope) => {
                                    let dispatcher = Arc::clone(&dispatcher);
                                    tokio::spawn(async move {
                                        dispatcher.dispatch(envelope).await;
                                    });
                                }
                                Err(e) => debug!(error = %e, "skipping malformed envelope"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "tunnel read error");
                        break;
                    }
                    None => {
                        info!("tunnel closed by remote");
                        break;
                    }
                }
            }
        }

        shared.drop_writer().await;
        shared.resolve_registration(Err(TunnelError::Registration(
            "connection lost during registration".to_string(),
        )));
    }
}

/// Liveness supervisor: force a reconnect when the proxy has been silent for
/// longer than [`PING_TIMEOUT`].
async fn liveness(shared: Arc<TunnelShared>) {
    let mut tick = tokio::time::interval(LIVENESS_TICK);
    loop {
        tick.tick().await;
        if shared.is_shutdown() {
            return;
        }
        if shared.is_connected() {
            let age = shared.ping_age();
            if age > PING_TIMEOUT {
                warn!(
                    seconds = age.as_secs(),
                    "no ping from rendezvous proxy, reconnecting"
                );
                shared.trigger_reconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_url_rewrites_scheme() {
        assert_eq!(
            subscribe_url("https://proxy.svc.example.com"),
            "wss://proxy.svc.example.com/proxy/subscribe"
        );
        assert_eq!(
            subscribe_url("http://127.0.0.1:9000"),
            "ws://127.0.0.1:9000/proxy/subscribe"
        );
        // Bare host defaults to plain ws.
        assert_eq!(
            subscribe_url("proxy.internal"),
            "ws://proxy.internal/proxy/subscribe"
        );
    }
}
