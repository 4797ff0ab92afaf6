//! In-memory connector with scripted peers.
//!
//! Each dial consumes the next [`DialScript`] (defaulting to
//! [`DialScript::Accept`]). Accepted sockets answer the authorization frame
//! with `mercury.buffer_state` and are then handed to the test as a
//! [`MemoryPeer`], which plays the server side.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

use crate::{
    error::TransportError,
    frame::BUFFER_STATE_EVENT,
    socket::{Connector, SocketHandle, WireMessage, strip_query},
};

/// Scripted outcome of one dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialScript {
    /// Dial fails immediately
    Refuse,
    /// Authorization answered with an error frame
    Reject,
    /// Authorization never answered
    Silent,
    /// Authorization confirmed
    Accept,
}

/// One recorded dial.
#[derive(Debug, Clone)]
pub struct DialRecord {
    /// Dialed URL including query parameters
    pub url: String,
    /// When the dial happened (Tokio clock, so paused time applies)
    pub at: Instant,
}

/// Connector whose peers live in memory.
#[derive(Debug)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<DialScript>>,
    dials: Mutex<Vec<DialRecord>>,
    auto_pong: Arc<AtomicBool>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Connector that accepts every dial and answers pings.
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(VecDeque::new()),
            dials: Mutex::new(Vec::new()),
            auto_pong: Arc::new(AtomicBool::new(true)),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        }
    }

    /// Queue outcomes for the next dials.
    pub fn script(&self, outcomes: impl IntoIterator<Item = DialScript>) {
        self.script.lock().extend(outcomes);
    }

    /// Whether accepted peers answer pings on their own.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::SeqCst);
    }

    /// All dials so far.
    pub fn dials(&self) -> Vec<DialRecord> {
        self.dials.lock().clone()
    }

    /// Number of dials so far.
    pub fn dial_count(&self) -> usize {
        self.dials.lock().len()
    }

    /// Next accepted peer, in dial order.
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn dial(&self, url: &str, capacity: usize) -> Result<SocketHandle, TransportError> {
        let outcome = self.script.lock().pop_front().unwrap_or(DialScript::Accept);
        self.dials.lock().push(DialRecord { url: url.to_string(), at: Instant::now() });

        if outcome == DialScript::Refuse {
            return Err(TransportError::Dial {
                url: strip_query(url),
                reason: "connection refused".to_string(),
            });
        }

        let (client_tx, server_rx) = mpsc::channel(capacity);
        let (server_tx, client_rx) = mpsc::channel(capacity);

        tokio::spawn(serve(
            outcome,
            url.to_string(),
            server_rx,
            server_tx,
            self.peers_tx.clone(),
            Arc::clone(&self.auto_pong),
        ));

        Ok(SocketHandle::new(client_tx, client_rx))
    }
}

/// Server side of one dialed socket: answer the handshake per script, then
/// relay to a [`MemoryPeer`].
async fn serve(
    outcome: DialScript,
    url: String,
    mut from_client: mpsc::Receiver<WireMessage>,
    to_client: mpsc::Sender<Result<WireMessage, TransportError>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    auto_pong: Arc<AtomicBool>,
) {
    let Some(WireMessage::Text(authorization)) = from_client.recv().await else {
        return;
    };
    let token = serde_json::from_str::<Value>(&authorization)
        .ok()
        .and_then(|frame| frame["data"]["token"].as_str().map(str::to_string));

    match outcome {
        DialScript::Refuse => {},
        DialScript::Reject => {
            let frame = json!({"type": "error", "data": {"reason": "unauthorized"}});
            let _ = to_client.send(Ok(WireMessage::Text(frame.to_string()))).await;
        },
        DialScript::Silent => while from_client.recv().await.is_some() {},
        DialScript::Accept => {
            let confirmation = event_frame(json!({"eventType": BUFFER_STATE_EVENT}));
            if to_client.send(Ok(WireMessage::Text(confirmation.to_string()))).await.is_err() {
                return;
            }

            let (relay_tx, relay_rx) = mpsc::unbounded_channel();
            let peer = MemoryPeer { url, token, from_client: relay_rx, to_client: to_client.clone() };
            if peers.send(peer).is_err() {
                return;
            }

            while let Some(message) = from_client.recv().await {
                if let WireMessage::Ping(data) = &message {
                    if auto_pong.load(Ordering::SeqCst) {
                        let _ = to_client.send(Ok(WireMessage::Pong(data.clone()))).await;
                    }
                }
                if relay_tx.send(message).is_err() {
                    break;
                }
            }
        },
    }
}

fn event_frame(data: Value) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "data": data,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "trackingId": format!("memory_{}", Uuid::new_v4()),
    })
}

/// Server side of an accepted in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    /// Dialed URL including query parameters
    pub url: String,
    /// Token from the authorization frame
    pub token: Option<String>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
    to_client: mpsc::Sender<Result<WireMessage, TransportError>>,
}

impl MemoryPeer {
    /// Next message from the client after the handshake. `None` once the
    /// client has dropped the socket.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    /// Send an event; `data` must contain `eventType`.
    pub async fn send_event(&self, data: Value) -> bool {
        self.send_text(event_frame(data).to_string()).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(WireMessage::Text(text.into()))).await.is_ok()
    }

    /// Send a pong.
    pub async fn pong(&self) -> bool {
        self.to_client.send(Ok(WireMessage::Pong(Vec::new()))).await.is_ok()
    }

    /// Close the socket from the server side.
    pub async fn close(&self) {
        let _ = self.to_client.send(Ok(WireMessage::Close)).await;
    }

    /// Fail the socket with an I/O error.
    pub async fn fail(&self, reason: &str) {
        let _ = self.to_client.send(Err(TransportError::Socket(reason.to_string()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuse_fails_dial_and_records_it() {
        let connector = MemoryConnector::new();
        connector.script([DialScript::Refuse]);

        let err = connector.dial("memory://events?x=1", 4).await.unwrap_err();
        assert!(matches!(err, TransportError::Dial { .. }));
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn accept_confirms_and_hands_out_peer() {
        let connector = MemoryConnector::new();
        let mut socket = connector.dial("memory://events", 4).await.unwrap();

        let auth = json!({"type": "authorization", "data": {"token": "Bearer t"}});
        socket.outbound.send(WireMessage::Text(auth.to_string())).await.unwrap();

        let Some(Ok(WireMessage::Text(text))) = socket.inbound.recv().await else {
            panic!("expected confirmation frame");
        };
        assert!(text.contains(BUFFER_STATE_EVENT));

        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(peer.token.as_deref(), Some("Bearer t"));

        socket.outbound.send(WireMessage::Ping(vec![])).await.unwrap();
        assert_eq!(peer.recv().await, Some(WireMessage::Ping(vec![])));
        assert_eq!(socket.inbound.recv().await.unwrap().unwrap(), WireMessage::Pong(vec![]));
    }
}
