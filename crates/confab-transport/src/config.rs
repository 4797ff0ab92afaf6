//! Transport configuration.

use std::time::Duration;

/// Time allowed for the server to confirm the authorization frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval at which ping frames are sent while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time allowed for a pong to arrive after a ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(14);

/// Delay before the first retry of a failed dial or handshake.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound on the retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Retries for the first connection in the client's lifetime.
pub const DEFAULT_INITIAL_CONNECT_RETRIES: u32 = 10;

/// Retries for each reconnection round.
pub const DEFAULT_RECONNECT_RETRIES: u32 = 5;

/// Transport client configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for the authorization handshake
    pub handshake_timeout: Duration,
    /// Ping interval (should be greater than `pong_timeout`)
    pub heartbeat_interval: Duration,
    /// Maximum wait for a pong before the connection is considered dead
    pub pong_timeout: Duration,
    /// First backoff delay; doubles after each failed attempt
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Retry budget for the first connection
    pub initial_connect_retries: u32,
    /// Retry budget for each reconnection round
    pub reconnect_retries: u32,
    /// Endpoint used when neither a custom URL nor device registration
    /// yields one during reconnection
    pub fallback_url: Option<String>,
    /// Capacity of the outbound and inbound socket channels
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            initial_connect_retries: DEFAULT_INITIAL_CONNECT_RETRIES,
            reconnect_retries: DEFAULT_RECONNECT_RETRIES,
            fallback_url: None,
            channel_capacity: 64,
        }
    }
}

impl TransportConfig {
    /// Short timeouts and small budgets for tests against in-memory peers.
    pub fn development() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            initial_connect_retries: 3,
            reconnect_retries: 2,
            ..Self::default()
        }
    }
}
