//! Confab real-time transport.
//!
//! A reconnecting event-socket client. It authenticates with a bearer
//! token, keeps the connection alive with pings, and fans inbound events
//! out to subscribers.
//!
//! # Architecture
//!
//! ```text
//! DeviceRegistry ──► socket URL ──► Connector::dial ──► SocketHandle
//!                                                         │ channels
//!                                                         ▼
//!                                     TransportClient (read + heartbeat loops)
//!                                                         │ Event
//!                                                         ▼
//!                                     Subscriptions (one task per handler)
//! ```
//!
//! # Components
//!
//! - [`TransportClient`]: connection lifecycle, backoff, reconnection
//! - [`Subscriptions`]: handler registry keyed by event type
//! - [`Connector`]: socket seam; [`WebSocketConnector`] for production,
//!   [`MemoryConnector`] for tests
//! - [`DeviceRegistry`]: external source of socket URLs

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backoff;
mod client;
mod config;
pub mod device;
mod error;
pub mod event;
pub mod frame;
pub mod memory;
pub mod socket;
pub mod subscription;

pub use backoff::Backoff;
pub use client::{ConnectionState, TransportClient};
pub use config::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_INITIAL_BACKOFF,
    DEFAULT_INITIAL_CONNECT_RETRIES, DEFAULT_MAX_BACKOFF, DEFAULT_PONG_TIMEOUT,
    DEFAULT_RECONNECT_RETRIES, TransportConfig,
};
pub use device::{DeviceRegistry, StaticEndpoint};
pub use error::{DeviceError, TransportError};
pub use event::{ACTIVITY_PREFIX, ActivitySummary, CONVERSATION_ACTIVITY_EVENT, Event, WILDCARD};
pub use memory::{DialRecord, DialScript, MemoryConnector, MemoryPeer};
pub use socket::{Connector, SocketHandle, WebSocketConnector, WireMessage};
pub use subscription::{Handler, SubscriptionId, Subscriptions};
