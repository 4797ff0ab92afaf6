//! Conversation activities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConversationError;

/// Verb of a new message
pub const VERB_POST: &str = "post";

/// Verb of a shared file or link
pub const VERB_SHARE: &str = "share";

/// Verb of a read receipt
pub const VERB_ACKNOWLEDGE: &str = "acknowledge";

/// Who performed an activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// User id
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// Conversation an activity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Conversation id
    #[serde(default)]
    pub id: String,
    /// Conversation URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Usually `conversation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Default key for the conversation's content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_url: Option<String>,
}

/// Payload of an activity. Text fields hold ciphertext for encrypted
/// conversations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityObject {
    /// Object id; for `acknowledge`, the acknowledged activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `comment`, `content`, `activity`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Rich message body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Plaintext recovered from an encrypted [`ActivityObject`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptedObject {
    /// Decrypted `displayName`
    pub display_name: Option<String>,
    /// Decrypted `content`
    pub content: Option<String>,
}

/// One conversation state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity id
    #[serde(default)]
    pub id: String,
    /// `post`, `share`, `acknowledge`, ...
    pub verb: String,
    /// Who did it
    #[serde(default)]
    pub actor: Actor,
    /// Where
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    /// What
    #[serde(default)]
    pub object: ActivityObject,
    /// Key the object was encrypted under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_url: Option<String>,
    /// Server publish time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Set once the object has been decrypted
    #[serde(skip)]
    pub decrypted: Option<DecryptedObject>,
}

impl Activity {
    /// Decode the `activity` member of an event payload.
    ///
    /// # Errors
    ///
    /// - `MissingActivity` if there is no `activity` member
    /// - `MalformedActivity` if it lacks a verb or has the wrong shape
    pub fn from_event_data(data: &Value) -> Result<Self, ConversationError> {
        let activity = data.get("activity").ok_or(ConversationError::MissingActivity)?;
        serde_json::from_value(activity.clone())
            .map_err(|e| ConversationError::MalformedActivity { reason: e.to_string() })
    }

    /// Key for the object: the activity's own, else the conversation's.
    pub fn key_uri(&self) -> Option<&str> {
        self.encryption_key_url
            .as_deref()
            .or_else(|| self.target.as_ref().and_then(|t| t.encryption_key_url.as_deref()))
    }

    /// Whether this verb carries displayable content.
    pub fn has_content(&self) -> bool {
        matches!(self.verb.as_str(), VERB_POST | VERB_SHARE)
    }

    /// For `acknowledge`, the id of the acknowledged activity.
    pub fn acknowledged_id(&self) -> Option<&str> {
        if self.verb != VERB_ACKNOWLEDGE {
            return None;
        }
        self.object.id.as_deref()
    }

    /// Decrypted text if available, else the raw `displayName`.
    pub fn text(&self) -> Option<&str> {
        self.decrypted
            .as_ref()
            .and_then(|d| d.display_name.as_deref())
            .or(self.object.display_name.as_deref())
    }
}
