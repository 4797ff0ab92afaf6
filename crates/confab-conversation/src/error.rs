//! Error types for activity handling

use confab_kms::KmsError;
use thiserror::Error;

/// Errors from decoding and processing conversation activities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// Event carries no `activity` member
    #[error("event has no activity")]
    MissingActivity,

    /// Activity does not match the expected shape
    #[error("malformed activity: {reason}")]
    MalformedActivity {
        /// Decoder error
        reason: String,
    },

    /// Content could not be decrypted
    #[error("decryption failed: {0}")]
    Decryption(#[from] KmsError),
}
