//! JSON frames exchanged over the event socket.
//!
//! Outbound traffic is a single authorization frame per connection; pings
//! and pongs are protocol-level frames. Inbound frames carry
//! `{id, data: {eventType, ...}, timestamp, trackingId, sequenceNumber,
//! headers}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `type` of the outbound authorization frame
pub const AUTHORIZATION_TYPE: &str = "authorization";

/// `type` of an inbound error frame
pub const ERROR_TYPE: &str = "error";

/// Server signal that buffered events have been flushed
pub const BUFFER_STATE_EVENT: &str = "mercury.buffer_state";

/// Server signal that the device is registered on this socket
pub const REGISTRATION_STATUS_EVENT: &str = "mercury.registration_status";

/// Query parameters appended to every socket URL, before `clientTimestamp`.
const CONNECTION_PARAMS: [(&str, &str); 3] =
    [("outboundWireFormat", "text"), ("bufferStates", "true"), ("aliasHttpStatus", "true")];

/// First frame sent on a new socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationFrame {
    /// Frame identifier
    pub id: String,
    /// Always [`AUTHORIZATION_TYPE`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Credential payload
    pub data: AuthorizationData,
    /// Correlation identifier for server-side logs
    pub tracking_id: String,
}

/// Payload of [`AuthorizationFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationData {
    /// `Bearer <token>`
    pub token: String,
}

impl AuthorizationFrame {
    /// Build an authorization frame for an access token.
    ///
    /// A token that already carries the `Bearer ` prefix is used as is.
    pub fn new(token: &str) -> Self {
        let token = if token.starts_with("Bearer ") {
            token.to_string()
        } else {
            format!("Bearer {token}")
        };

        Self {
            id: Uuid::new_v4().to_string(),
            kind: AUTHORIZATION_TYPE.to_string(),
            data: AuthorizationData { token },
            tracking_id: format!("confab_{}", Uuid::new_v4()),
        }
    }
}

/// A frame received from the server.
///
/// Every member is optional on the wire; missing members decode to their
/// defaults so that one odd frame never stalls the read loop.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// Frame identifier
    #[serde(default)]
    pub id: Option<String>,
    /// Frame type; only error frames set this
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Event payload
    #[serde(default)]
    pub data: Value,
    /// Server clock in Unix milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Server correlation identifier
    #[serde(default)]
    pub tracking_id: Option<String>,
    /// Per-connection sequence number
    #[serde(default)]
    pub sequence_number: Option<u64>,
    /// Transport headers
    #[serde(default)]
    pub headers: Value,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `data.eventType`, if present.
    pub fn event_type(&self) -> Option<&str> {
        self.data.get("eventType").and_then(Value::as_str)
    }

    /// True for explicit error frames.
    pub fn is_error(&self) -> bool {
        self.kind.as_deref() == Some(ERROR_TYPE)
    }

    /// Human-readable reason carried by an error frame.
    pub fn error_reason(&self) -> String {
        ["reason", "message", "error"]
            .iter()
            .find_map(|field| self.data.get(*field).and_then(Value::as_str))
            .map_or_else(|| self.data.to_string(), str::to_string)
    }

    /// True for the handshake confirmation signals, which are consumed by
    /// the transport and never dispatched.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(self.event_type(), Some(BUFFER_STATE_EVENT | REGISTRATION_STATUS_EVENT))
    }
}

/// Append the connection query parameters to a socket URL.
pub fn connection_url(base: &str, client_timestamp_ms: i64) -> String {
    let mut url = base.trim_end_matches(['?', '&']).to_string();
    let mut separator = if url.contains('?') { '&' } else { '?' };

    for (name, value) in CONNECTION_PARAMS {
        url.push(separator);
        url.push_str(name);
        url.push('=');
        url.push_str(value);
        separator = '&';
    }
    url.push_str(&format!("&clientTimestamp={client_timestamp_ms}"));

    url
}
