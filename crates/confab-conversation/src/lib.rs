//! Confab conversations.
//!
//! Joins the event transport and the KMS client: conversation activities
//! are decoded, their content decrypted, and the result routed to handlers
//! registered per verb.
//!
//! ```text
//! TransportClient ──conversation.activity──► ActivityDispatcher ──► handlers
//!        │                                          │
//!        └──encryption.kms_message──► KmsClient ◄───┘ decrypt_text
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod activity;
mod client;
mod decryptor;
mod dispatcher;
mod error;

pub use activity::{
    Activity, ActivityObject, Actor, DecryptedObject, Target, VERB_ACKNOWLEDGE, VERB_POST,
    VERB_SHARE,
};
pub use client::{ConversationClient, KMS_MESSAGE_EVENT};
pub use decryptor::ContentDecryptor;
pub use dispatcher::{ANY_VERB, ActivityDispatcher, ActivityHandler, HandlerId};
pub use error::ConversationError;
