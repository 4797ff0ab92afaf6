//! Typed events derived from inbound frames.

use serde_json::Value;

use crate::frame::InboundFrame;

/// Event type carrying a conversation activity
pub const CONVERSATION_ACTIVITY_EVENT: &str = "conversation.activity";

/// Subscription type that matches every dispatched event
pub const WILDCARD: &str = "*";

/// Prefix of the compound type derived from an activity verb
pub const ACTIVITY_PREFIX: &str = "activity:";

/// An event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Frame identifier
    pub id: Option<String>,
    /// `data.eventType`
    pub event_type: String,
    /// Full event payload
    pub data: Value,
    /// Server clock in Unix milliseconds
    pub timestamp: Option<i64>,
    /// Server correlation identifier
    pub tracking_id: Option<String>,
    /// Per-connection sequence number
    pub sequence_number: Option<u64>,
    /// Transport headers
    pub headers: Value,
    /// Activity metadata for [`CONVERSATION_ACTIVITY_EVENT`]
    pub activity: Option<ActivitySummary>,
}

/// Routing metadata extracted from a conversation activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySummary {
    /// Activity verb (`post`, `share`, `acknowledge`, ...)
    pub verb: String,
    /// Actor identifier
    pub actor_id: Option<String>,
    /// Activity object, undecoded
    pub object: Value,
}

impl Event {
    /// Synthetic event with only a type and payload.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let event_type = event_type.into();
        let activity = summarize_activity(&event_type, &data);
        Self {
            id: None,
            event_type,
            data,
            timestamp: None,
            tracking_id: None,
            sequence_number: None,
            headers: Value::Null,
            activity,
        }
    }

    /// Build an event from a frame. Returns `None` if the frame has no
    /// `data.eventType`.
    pub fn from_frame(frame: InboundFrame) -> Option<Self> {
        let event_type = frame.event_type()?.to_string();
        let activity = summarize_activity(&event_type, &frame.data);

        Some(Self {
            id: frame.id,
            event_type,
            data: frame.data,
            timestamp: frame.timestamp,
            tracking_id: frame.tracking_id,
            sequence_number: frame.sequence_number,
            headers: frame.headers,
            activity,
        })
    }

    /// `activity:<verb>` for conversation activities.
    pub fn compound_type(&self) -> Option<String> {
        self.activity.as_ref().map(|a| format!("{ACTIVITY_PREFIX}{}", a.verb))
    }
}

fn summarize_activity(event_type: &str, data: &Value) -> Option<ActivitySummary> {
    if event_type != CONVERSATION_ACTIVITY_EVENT {
        return None;
    }

    let activity = data.get("activity")?;
    let verb = activity.get("verb").and_then(Value::as_str)?.to_string();
    let actor_id =
        activity.get("actor").and_then(|a| a.get("id")).and_then(Value::as_str).map(str::to_string);
    let object = activity.get("object").cloned().unwrap_or(Value::Null);

    Some(ActivitySummary { verb, actor_id, object })
}
