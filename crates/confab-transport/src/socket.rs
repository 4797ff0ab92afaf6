//! Socket seam.
//!
//! A [`Connector`] dials a URL and returns a [`SocketHandle`]: a pair of
//! channels plus an internal bridge task that owns the real socket. The
//! transport client only ever sees [`WireMessage`]s, which keeps it
//! independent of the WebSocket library and lets tests substitute in-memory
//! peers.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Message on the socket, independent of the WebSocket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// JSON text frame
    Text(String),
    /// Protocol ping
    Ping(Vec<u8>),
    /// Protocol pong
    Pong(Vec<u8>),
    /// Normal closure
    Close,
}

/// Channels to a dialed socket.
#[derive(Debug)]
pub struct SocketHandle {
    /// Messages to the peer
    pub outbound: mpsc::Sender<WireMessage>,
    /// Messages from the peer; an `Err` is terminal
    pub inbound: mpsc::Receiver<Result<WireMessage, TransportError>>,
    /// Bridge task, aborted when the socket is discarded
    pub bridge: Option<AbortHandle>,
}

impl SocketHandle {
    /// Handle without a bridge task.
    pub fn new(
        outbound: mpsc::Sender<WireMessage>,
        inbound: mpsc::Receiver<Result<WireMessage, TransportError>>,
    ) -> Self {
        Self { outbound, inbound, bridge: None }
    }
}

/// Dials sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url` (query parameters included). Channel buffers
    /// hold `capacity` messages.
    async fn dial(&self, url: &str, capacity: usize) -> Result<SocketHandle, TransportError>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn dial(&self, url: &str, capacity: usize) -> Result<SocketHandle, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Dial { url: strip_query(url), reason: e.to_string() })?;

        let (to_socket_tx, to_socket_rx) = mpsc::channel(capacity);
        let (from_socket_tx, from_socket_rx) = mpsc::channel(capacity);

        let bridge = tokio::spawn(run_socket(stream, to_socket_rx, from_socket_tx));

        Ok(SocketHandle {
            outbound: to_socket_tx,
            inbound: from_socket_rx,
            bridge: Some(bridge.abort_handle()),
        })
    }
}

/// Run the socket, bridging between channels and the WebSocket stream.
async fn run_socket<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::Receiver<WireMessage>,
    inbound: mpsc::Sender<Result<WireMessage, TransportError>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let closing = message == WireMessage::Close;
                if let Err(e) = write.send(to_tungstenite(message)).await {
                    let _ = inbound.send(Err(TransportError::Socket(e.to_string()))).await;
                    break;
                }
                if closing {
                    break;
                }
            },
            frame = read.next() => {
                let forward = match frame {
                    Some(Ok(Message::Text(text))) => WireMessage::Text(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => WireMessage::Text(text),
                        Err(_) => {
                            tracing::debug!("Dropping non-UTF-8 binary frame");
                            continue;
                        },
                    },
                    // tungstenite answers pings itself on the next read or write
                    Some(Ok(Message::Ping(data))) => WireMessage::Ping(data),
                    Some(Ok(Message::Pong(data))) => WireMessage::Pong(data),
                    Some(Ok(Message::Close(_))) => {
                        let _ = inbound.send(Ok(WireMessage::Close)).await;
                        break;
                    },
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(e)) => {
                        let _ = inbound.send(Err(TransportError::Socket(e.to_string()))).await;
                        break;
                    },
                    None => {
                        let _ = inbound
                            .send(Err(TransportError::Socket("stream ended".to_string())))
                            .await;
                        break;
                    },
                };

                if inbound.send(Ok(forward)).await.is_err() {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

fn to_tungstenite(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Ping(data) => Message::Ping(data),
        WireMessage::Pong(data) => Message::Pong(data),
        WireMessage::Close => Message::Close(None),
    }
}

/// URL without its query string, for logs and errors.
pub(crate) fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}
