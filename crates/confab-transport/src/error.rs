//! Transport error types

use std::time::Duration;

use thiserror::Error;

/// Errors from the device-registration collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Registration request failed
    #[error("device registration failed: {reason}")]
    Registration {
        /// Reason reported by the registry
        reason: String,
    },

    /// Registry has no web socket URL for this device
    #[error("no web socket URL registered")]
    NoWebSocketUrl,
}

/// Errors from the transport client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Neither a custom URL, device registration, nor a fallback URL is
    /// available
    #[error("no endpoint source available")]
    NoEndpoint,

    /// Device registration lookup failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Socket could not be opened
    #[error("dial {url} failed: {reason}")]
    Dial {
        /// URL that was dialed (without query parameters)
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Server did not confirm the authorization frame in time
    #[error("handshake timed out after {timeout:?}")]
    HandshakeTimeout {
        /// Configured handshake timeout
        timeout: Duration,
    },

    /// Server answered the authorization frame with an error or closed
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Error text or close reason from the server
        reason: String,
    },

    /// `connect()` called while connecting or connected
    #[error("already connected")]
    AlreadyConnected,

    /// Operation requires a live connection
    #[error("not connected")]
    NotConnected,

    /// Retry budget spent without a successful handshake
    #[error("connection failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        last: Box<TransportError>,
    },

    /// Connection attempt interrupted by `disconnect()`
    #[error("interrupted by disconnect")]
    Interrupted,

    /// Socket error on an established connection
    #[error("socket error: {0}")]
    Socket(String),

    /// Outbound channel closed
    #[error("send failed: socket closed")]
    SendClosed,

    /// Frame could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),
}

impl TransportError {
    /// Returns true if retrying the connection may succeed.
    ///
    /// Rejections and configuration problems are not transient; dial
    /// failures, timeouts, and socket errors are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::HandshakeTimeout { .. } | Self::Socket(_) | Self::SendClosed
        )
    }
}
