use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// A WebSocket connection to the local origin.
pub type LocalStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type LocalSink = SplitSink<LocalStream, Message>;

/// One live pairing of a remote WebSocket session with a local connection.
///
/// The write half of the local socket sits behind a per-bridge lock: the
/// dispatcher's inbound-message writer and in-band interception frames (the
/// auth handshake) would otherwise interleave on the same connection.
pub struct WsBridge {
    id: String,
    deadline: DateTime<Utc>,
    writer: tokio::sync::Mutex<LocalSink>,
}

impl WsBridge {
    pub fn new(id: impl Into<String>, deadline: DateTime<Utc>, writer: LocalSink) -> Self {
        Self {
            id: id.into(),
            deadline,
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    /// Correlation id of the `ws-request` that opened this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The mandate deadline; the session must be gone once this is reached.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Write a frame to the local origin.
    pub async fn send_local(
        &self,
        message: Message,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.writer.lock().await.send(message).await
    }

    /// Close the local side. Errors are irrelevant at this point.
    pub async fn close_local(&self) {
        let _ = self.writer.lock().await.close().await;
    }
}

impl std::fmt::Debug for WsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsBridge")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Owner of all live [`WsBridge`]s, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    bridges: Mutex<HashMap<String, std::sync::Arc<WsBridge>>>,
}

impl SessionRegistry {
    pub fn insert(&self, bridge: std::sync::Arc<WsBridge>) {
        self.bridges
            .lock()
            .expect("session registry poisoned")
            .insert(bridge.id().to_string(), bridge);
    }

    pub fn get(&self, id: &str) -> Option<std::sync::Arc<WsBridge>> {
        self.bridges
            .lock()
            .expect("session registry poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a bridge; the second removal of the same id is a no-op.
    pub fn remove(&self, id: &str) -> Option<std::sync::Arc<WsBridge>> {
        self.bridges
            .lock()
            .expect("session registry poisoned")
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.bridges.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every bridge and close its local side. Shutdown only.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut bridges = self.bridges.lock().expect("session registry poisoned");
            bridges.drain().map(|(_, bridge)| bridge).collect()
        };

        for bridge in drained {
            bridge.close_local().await;
        }
    }
}
