//! Reconnecting transport client.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────────┐  connect()  ┌────────────┐  confirmation  ┌───────────┐
//! │ Disconnected │────────────>│ Connecting │───────────────>│ Connected │
//! └──────────────┘             └────────────┘                └───────────┘
//!        ^                           │ budget spent                │
//!        │                           ↓                             │ socket error,
//!        └───────────────────────────┴─────────────────────────────┘ missed pong,
//!                                                                    disconnect()
//! ```
//!
//! Each connection runs two tasks: a read loop that decodes frames and
//! dispatches events, and a heartbeat loop that sends pings and enforces
//! the pong deadline. Either one reports a lost connection, which starts a
//! single background reconnection task unless the client was disconnected
//! deliberately.
//!
//! Locks are `parking_lot` and are never held across an `.await`.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    backoff::Backoff,
    config::TransportConfig,
    device::DeviceRegistry,
    error::TransportError,
    event::Event,
    frame::{self, AuthorizationFrame, InboundFrame},
    socket::{Connector, SocketHandle, WebSocketConnector, WireMessage, strip_query},
    subscription::{SubscriptionId, Subscriptions},
};

/// Weight of a new sample in the clock-offset moving average.
const CLOCK_OFFSET_SMOOTHING: f64 = 0.25;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Dialing, authenticating, or backing off
    Connecting,
    /// Handshake confirmed, loops running
    Connected,
}

/// Reconnecting event-socket client.
///
/// Cheap to clone; clones share one connection and one handler registry.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    token: String,
    connector: Arc<dyn Connector>,
    device: Option<Arc<dyn DeviceRegistry>>,
    custom_url: RwLock<Option<String>>,
    state: Mutex<ConnectionState>,
    active: Mutex<Option<ActiveConnection>>,
    heartbeat: Mutex<HeartbeatState>,
    subscriptions: Subscriptions,
    generation: AtomicU64,
    ever_connected: AtomicBool,
    reconnecting: AtomicBool,
    deliberate: AtomicBool,
    /// Bumped by `disconnect()` to interrupt dials and backoff sleeps
    stop: watch::Sender<u64>,
}

/// The live socket of one connection generation.
struct ActiveConnection {
    generation: u64,
    outbound: mpsc::Sender<WireMessage>,
    shutdown: watch::Sender<bool>,
    bridge: Option<AbortHandle>,
}

impl ActiveConnection {
    /// Stop the loops and tear the socket down immediately.
    fn abort(self) {
        let _ = self.shutdown.send(true);
        if let Some(bridge) = self.bridge {
            bridge.abort();
        }
    }

    /// Stop the loops and ask the socket to send a close frame. The bridge
    /// exits on its own once the close frame is written.
    fn close(self) {
        let _ = self.shutdown.send(true);
        if self.outbound.try_send(WireMessage::Close).is_err() {
            if let Some(bridge) = self.bridge {
                bridge.abort();
            }
        }
    }
}

#[derive(Debug, Default)]
struct HeartbeatState {
    ping_sent_at: Option<Instant>,
    pong_deadline: Option<Instant>,
    round_trip: Option<Duration>,
    clock_offset_ms: Option<f64>,
}

impl TransportClient {
    /// Client dialing through `connector`.
    ///
    /// `device` supplies socket URLs unless a custom URL is set.
    pub fn new(
        config: TransportConfig,
        token: impl Into<String>,
        connector: Arc<dyn Connector>,
        device: Option<Arc<dyn DeviceRegistry>>,
    ) -> Self {
        let (stop, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                token: token.into(),
                connector,
                device,
                custom_url: RwLock::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                active: Mutex::new(None),
                heartbeat: Mutex::new(HeartbeatState::default()),
                subscriptions: Subscriptions::new(),
                generation: AtomicU64::new(0),
                ever_connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                deliberate: AtomicBool::new(false),
                stop,
            }),
        }
    }

    /// Client dialing real WebSockets.
    pub fn websocket(
        config: TransportConfig,
        token: impl Into<String>,
        device: Option<Arc<dyn DeviceRegistry>>,
    ) -> Self {
        Self::new(config, token, Arc::new(WebSocketConnector), device)
    }

    /// Override the socket URL. Takes precedence over device registration
    /// on the next connect or reconnect.
    pub fn set_custom_url(&self, url: Option<String>) {
        *self.inner.custom_url.write() = url;
    }

    /// Device-registration collaborator, if any.
    pub fn device(&self) -> Option<Arc<dyn DeviceRegistry>> {
        self.inner.device.clone()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// True once the handshake has been confirmed and until the connection
    /// is lost or closed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Estimated server clock minus local clock, in milliseconds.
    pub fn clock_offset(&self) -> Option<i64> {
        self.inner.heartbeat.lock().clock_offset_ms.map(|offset| offset.round() as i64)
    }

    /// Last measured ping round trip.
    pub fn round_trip(&self) -> Option<Duration> {
        self.inner.heartbeat.lock().round_trip
    }

    /// Register a handler. See [`Subscriptions::on`].
    pub fn on<F, Fut>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.subscriptions.on(event_type, handler)
    }

    /// Remove a handler. Returns false if nothing matched.
    pub fn off(&self, event_type: &str, id: SubscriptionId) -> bool {
        self.inner.subscriptions.off(event_type, id)
    }

    /// Handlers registered for exactly this type.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner.subscriptions.count(event_type)
    }

    /// Connect and authenticate.
    ///
    /// Dial and handshake failures are retried with exponential backoff. The
    /// first connection in the client's lifetime uses
    /// `initial_connect_retries`, later ones `reconnect_retries`.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if connecting or connected
    /// - `NoEndpoint` / `Device` if no socket URL can be resolved
    /// - `RetriesExhausted` once the retry budget is spent
    /// - `Interrupted` if `disconnect()` is called meanwhile
    pub async fn connect(&self) -> Result<(), TransportError> {
        // Any disconnect() from here on interrupts this call
        let mut stop = self.inner.stop.subscribe();
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(TransportError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        self.inner.deliberate.store(false, Ordering::SeqCst);

        let result = match self.inner.resolve_endpoint(false).await {
            Ok(url) => self.inner.connect_with_backoff(&url, &mut stop).await,
            Err(e) => Err(e),
        };

        match &result {
            // disconnect() already reset the state; a newer connect may own it now
            Ok(()) | Err(TransportError::Interrupted) => {},
            Err(_) => self.inner.set_state_unless_connected(ConnectionState::Disconnected),
        }
        result
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        self.inner.deliberate.store(true, Ordering::SeqCst);
        self.inner.stop.send_modify(|epoch| *epoch += 1);

        let active = self.inner.active.lock().take();
        if let Some(connection) = active {
            tracing::info!("Disconnecting (generation {})", connection.generation);
            connection.close();
        }

        *self.inner.state.lock() = ConnectionState::Disconnected;
        let mut heartbeat = self.inner.heartbeat.lock();
        heartbeat.ping_sent_at = None;
        heartbeat.pong_deadline = None;
    }
}

impl fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportClient")
            .field("state", &self.state())
            .field("subscriptions", &self.inner.subscriptions)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_state_unless_connected(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != ConnectionState::Connected {
            *current = state;
        }
    }

    /// Custom URL, else device registration, else the fallback URL.
    ///
    /// `refresh` re-registers the device first, for reconnection.
    async fn resolve_endpoint(&self, refresh: bool) -> Result<String, TransportError> {
        if let Some(url) = self.custom_url.read().clone() {
            return Ok(url);
        }

        if let Some(device) = &self.device {
            if refresh {
                if let Err(e) = device.register().await {
                    tracing::warn!("Device re-registration failed: {}", e);
                }
            }
            match device.web_socket_url().await {
                Ok(url) => return Ok(url),
                Err(e) if self.config.fallback_url.is_none() => return Err(e.into()),
                Err(e) => tracing::warn!("Device lookup failed, using fallback URL: {}", e),
            }
        }

        self.config.fallback_url.clone().ok_or(TransportError::NoEndpoint)
    }

    /// Dial `url` until connected, the budget is spent, or `stop` moves past
    /// the epoch the caller observed.
    async fn connect_with_backoff(
        self: &Arc<Self>,
        url: &str,
        stop: &mut watch::Receiver<u64>,
    ) -> Result<(), TransportError> {
        let retries = if self.ever_connected.load(Ordering::SeqCst) {
            self.config.reconnect_retries
        } else {
            self.config.initial_connect_retries
        };
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempt = 0u32;

        loop {
            if stopped(stop) {
                return Err(TransportError::Interrupted);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = stop.changed() => return Err(TransportError::Interrupted),
                result = self.establish(url) => result,
            };

            let error = match result {
                Ok(socket) if stopped(stop) => {
                    discard(socket);
                    return Err(TransportError::Interrupted);
                },
                Ok(socket) => {
                    self.activate(socket);
                    return Ok(());
                },
                Err(e) => e,
            };

            if attempt > retries {
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                "Connection attempt {} to {} failed: {}; retrying in {:?}",
                attempt,
                strip_query(url),
                error,
                delay
            );

            tokio::select! {
                biased;
                _ = stop.changed() => return Err(TransportError::Interrupted),
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Dial, authenticate, and send the first ping.
    async fn establish(&self, url: &str) -> Result<SocketHandle, TransportError> {
        let timeout = self.config.handshake_timeout;
        let full_url = frame::connection_url(url, chrono::Utc::now().timestamp_millis());
        tracing::debug!("Dialing {}", strip_query(url));

        let mut socket =
            tokio::time::timeout(timeout, self.connector.dial(&full_url, self.config.channel_capacity))
                .await
                .map_err(|_| TransportError::HandshakeTimeout { timeout })??;

        let authorization = serde_json::to_string(&AuthorizationFrame::new(&self.token))
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if socket.outbound.send(WireMessage::Text(authorization)).await.is_err() {
            discard(socket);
            return Err(TransportError::SendClosed);
        }

        match tokio::time::timeout(timeout, await_confirmation(&mut socket.inbound)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                discard(socket);
                return Err(e);
            },
            Err(_) => {
                discard(socket);
                return Err(TransportError::HandshakeTimeout { timeout });
            },
        }

        // Servers expect an immediate ping after confirmation
        if socket.outbound.send(WireMessage::Ping(Vec::new())).await.is_err() {
            discard(socket);
            return Err(TransportError::SendClosed);
        }

        Ok(socket)
    }

    fn activate(self: &Arc<Self>, socket: SocketHandle) {
        let SocketHandle { outbound, inbound, bridge } = socket;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let now = Instant::now();
            let mut heartbeat = self.heartbeat.lock();
            heartbeat.ping_sent_at = Some(now);
            heartbeat.pong_deadline = Some(now + self.config.pong_timeout);
        }

        let previous = self.active.lock().replace(ActiveConnection {
            generation,
            outbound: outbound.clone(),
            shutdown: shutdown_tx,
            bridge,
        });
        if let Some(previous) = previous {
            previous.abort();
        }

        *self.state.lock() = ConnectionState::Connected;
        self.ever_connected.store(true, Ordering::SeqCst);

        tokio::spawn(read_loop(Arc::clone(self), inbound, shutdown_rx.clone(), generation));
        tokio::spawn(heartbeat_loop(Arc::clone(self), outbound, shutdown_rx, generation));

        tracing::info!("Connected (generation {})", generation);
    }

    fn handle_text(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Skipping undecodable frame: {}", e);
                return;
            },
        };

        if let Some(timestamp) = frame.timestamp {
            self.observe_server_time(timestamp);
        }

        if frame.is_error() {
            tracing::warn!("Server error frame: {}", frame.error_reason());
            return;
        }
        if frame.is_bookkeeping() {
            tracing::debug!("Consumed {:?}", frame.event_type());
            return;
        }

        let Some(event) = Event::from_frame(frame) else {
            tracing::debug!("Skipping frame without event type");
            return;
        };

        let event_type = event.event_type.clone();
        let spawned = self.subscriptions.dispatch(event);
        tracing::trace!("Dispatched {} to {} handlers", event_type, spawned);
    }

    fn observe_server_time(&self, server_ms: i64) {
        let local_ms = chrono::Utc::now().timestamp_millis() as f64;
        let mut heartbeat = self.heartbeat.lock();
        let half_round_trip_ms = heartbeat.round_trip.map_or(0.0, |rtt| rtt.as_secs_f64() * 500.0);
        let sample = server_ms as f64 + half_round_trip_ms - local_ms;

        heartbeat.clock_offset_ms = Some(match heartbeat.clock_offset_ms {
            None => sample,
            Some(previous) => previous + CLOCK_OFFSET_SMOOTHING * (sample - previous),
        });
    }

    fn handle_pong(&self) {
        let mut heartbeat = self.heartbeat.lock();
        if let Some(sent) = heartbeat.ping_sent_at.take() {
            heartbeat.round_trip = Some(sent.elapsed());
        }
        heartbeat.pong_deadline = None;
    }

    fn ping_sent(&self) {
        let now = Instant::now();
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.ping_sent_at = Some(now);
        if heartbeat.pong_deadline.is_none() {
            heartbeat.pong_deadline = Some(now + self.config.pong_timeout);
        }
    }

    fn pong_overdue(&self) -> bool {
        self.heartbeat.lock().pong_deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Called by either loop when its connection dies. Only the first report
    /// for a generation has any effect.
    fn connection_lost(self: &Arc<Self>, generation: u64) {
        let lost = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(connection) if connection.generation == generation => active.take(),
                _ => None,
            }
        };
        let Some(connection) = lost else {
            return;
        };
        connection.abort();

        *self.state.lock() = ConnectionState::Disconnected;
        self.heartbeat.lock().pong_deadline = None;

        if self.deliberate.load(Ordering::SeqCst) {
            return;
        }

        tracing::warn!("Connection lost (generation {}); reconnecting", generation);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                inner.reconnect().await;
                inner.reconnecting.store(false, Ordering::SeqCst);

                // A connection lost while the flag was still set was ignored
                let needs_another = !inner.deliberate.load(Ordering::SeqCst)
                    && *inner.state.lock() == ConnectionState::Disconnected;
                if !needs_another || inner.reconnecting.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
    }

    /// Reconnection rounds until connected or deliberately disconnected.
    async fn reconnect(self: &Arc<Self>) {
        let mut stop = self.stop.subscribe();

        loop {
            if self.deliberate.load(Ordering::SeqCst) || stopped(&stop) {
                return;
            }
            {
                let mut state = self.state.lock();
                if *state != ConnectionState::Disconnected {
                    return;
                }
                *state = ConnectionState::Connecting;
            }

            let result = match self.resolve_endpoint(true).await {
                Ok(url) => self.connect_with_backoff(&url, &mut stop).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::info!("Reconnected");
                    return;
                },
                Err(TransportError::Interrupted) => return,
                Err(e) => {
                    self.set_state_unless_connected(ConnectionState::Disconnected);
                    tracing::warn!("Reconnection round failed: {}", e);
                    tokio::select! {
                        biased;
                        _ = stop.changed() => return,
                        () = tokio::time::sleep(self.config.max_backoff) => {},
                    }
                },
            }
        }
    }
}

/// True once `disconnect()` has bumped the stop epoch past what `stop` saw.
fn stopped(stop: &watch::Receiver<u64>) -> bool {
    stop.has_changed().unwrap_or(true)
}

/// Wait for `mercury.buffer_state` / `mercury.registration_status`, or an
/// error frame or close.
async fn await_confirmation(
    inbound: &mut mpsc::Receiver<Result<WireMessage, TransportError>>,
) -> Result<(), TransportError> {
    loop {
        match inbound.recv().await {
            None => {
                return Err(TransportError::HandshakeRejected {
                    reason: "socket closed during handshake".to_string(),
                });
            },
            Some(Err(e)) => return Err(e),
            Some(Ok(WireMessage::Close)) => {
                return Err(TransportError::HandshakeRejected {
                    reason: "closed by server".to_string(),
                });
            },
            Some(Ok(WireMessage::Text(text))) => match InboundFrame::parse(&text) {
                Ok(frame) if frame.is_error() => {
                    return Err(TransportError::HandshakeRejected { reason: frame.error_reason() });
                },
                Ok(frame) if frame.is_bookkeeping() => return Ok(()),
                Ok(frame) => {
                    tracing::debug!("Ignoring {:?} before confirmation", frame.event_type());
                },
                Err(e) => tracing::debug!("Undecodable frame during handshake: {}", e),
            },
            Some(Ok(WireMessage::Ping(_) | WireMessage::Pong(_))) => {},
        }
    }
}

/// Drop a socket that never became active.
fn discard(socket: SocketHandle) {
    if let Some(bridge) = socket.bridge {
        bridge.abort();
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut inbound: mpsc::Receiver<Result<WireMessage, TransportError>>,
    mut shutdown: watch::Receiver<bool>,
    generation: u64,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = inbound.recv() => message,
        };

        match message {
            Some(Ok(WireMessage::Text(text))) => inner.handle_text(&text),
            Some(Ok(WireMessage::Pong(_))) => inner.handle_pong(),
            Some(Ok(WireMessage::Ping(_))) => {},
            Some(Ok(WireMessage::Close)) => {
                tracing::debug!("Server closed connection (generation {})", generation);
                inner.connection_lost(generation);
                break;
            },
            Some(Err(e)) => {
                tracing::warn!("Socket error (generation {}): {}", generation, e);
                inner.connection_lost(generation);
                break;
            },
            None => {
                inner.connection_lost(generation);
                break;
            },
        }
    }
}

async fn heartbeat_loop(
    inner: Arc<Inner>,
    outbound: mpsc::Sender<WireMessage>,
    mut shutdown: watch::Receiver<bool>,
    generation: u64,
) {
    let interval = inner.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = inner.heartbeat.lock().pong_deadline;

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            () = sleep_until_deadline(deadline) => {
                // The deadline may have been cleared by a pong meanwhile
                if inner.pong_overdue() {
                    tracing::warn!(
                        "No pong within {:?} (generation {}); reconnecting",
                        inner.config.pong_timeout,
                        generation
                    );
                    inner.connection_lost(generation);
                    break;
                }
            },
            _ = ticker.tick() => {
                if outbound.send(WireMessage::Ping(Vec::new())).await.is_err() {
                    tracing::warn!("Ping failed (generation {}); reconnecting", generation);
                    inner.connection_lost(generation);
                    break;
                }
                inner.ping_sent();
            },
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DialScript, MemoryConnector};

    fn client(connector: &Arc<MemoryConnector>) -> TransportClient {
        let client = TransportClient::new(
            TransportConfig::development(),
            "token",
            Arc::clone(connector) as Arc<dyn Connector>,
            None,
        );
        client.set_custom_url(Some("memory://events".to_string()));
        client
    }

    #[tokio::test]
    async fn connect_without_endpoint_fails() {
        let client = TransportClient::new(
            TransportConfig::development(),
            "token",
            Arc::new(MemoryConnector::new()),
            None,
        );

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::NoEndpoint));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_sends_authorization_and_ping() {
        let connector = Arc::new(MemoryConnector::new());
        let client = client(&connector);

        client.connect().await.unwrap();
        assert!(client.is_connected());

        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(peer.token.as_deref(), Some("Bearer token"));
        assert_eq!(peer.recv().await, Some(WireMessage::Ping(Vec::new())));

        let url = &connector.dials()[0].url;
        assert!(url.starts_with("memory://events?outboundWireFormat=text"));
        assert!(url.contains("clientTimestamp="));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let connector = Arc::new(MemoryConnector::new());
        let client = client(&connector);

        client.connect().await.unwrap();
        assert!(matches!(client.connect().await, Err(TransportError::AlreadyConnected)));
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_exhausts_budget() {
        let connector = Arc::new(MemoryConnector::new());
        connector.script([DialScript::Reject; 4]);
        let client = client(&connector);

        let err = client.connect().await.unwrap_err();
        match err {
            TransportError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4, "one attempt plus three retries");
                assert!(matches!(*last, TransportError::HandshakeRejected { .. }));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_handshake() {
        let connector = Arc::new(MemoryConnector::new());
        connector.script([DialScript::Silent]);
        let client = client(&connector);

        client.connect().await.unwrap();
        assert_eq!(connector.dial_count(), 2, "timed out once, then accepted");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let connector = Arc::new(MemoryConnector::new());
        let client = client(&connector);

        client.connect().await.unwrap();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(connector.dial_count(), 2);
    }

    #[tokio::test]
    async fn pong_records_round_trip() {
        let connector = Arc::new(MemoryConnector::new());
        let client = client(&connector);
        client.connect().await.unwrap();

        let mut peer = connector.next_peer().await.unwrap();
        peer.recv().await.unwrap();

        for _ in 0..100 {
            if client.round_trip().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(client.round_trip().is_some(), "auto pong should be observed");
    }
}
