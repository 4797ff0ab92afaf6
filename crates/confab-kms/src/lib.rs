//! Confab key management client.
//!
//! Negotiates a symmetric session with the key management service (KMS),
//! resolves content keys through it, and decrypts message bodies with them.
//!
//! # Architecture
//!
//! ```text
//! KmsClient::decrypt_text
//!        │
//!        ▼
//! KmsClient::get_key ──► KeyCache ──miss──► Singleflight (per URI)
//!                                                │
//!                                                ▼
//!                             SessionSlot (one negotiation at a time)
//!                                                │
//!                                                ▼
//!                                   KmsApi::post_messages
//!                                     │                │
//!                               200 body        202 + event transport
//!                                     │                │
//!                                     └──► PendingRequests ◄── process_kms_messages
//! ```
//!
//! # Components
//!
//! - [`KmsClient`]: session negotiation, key resolution, message decoding
//! - [`KmsApi`]: network seam; [`HttpKmsApi`] for production
//! - [`KeyCache`]: resolved keys, never expired
//! - [`Singleflight`]: per-URI request coalescing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod cache;
mod client;
mod config;
mod decrypt;
mod error;
mod pending;
mod session;
mod singleflight;
mod uri;
pub mod wire;

pub use api::{HttpKmsApi, KmsApi, KmsInfo, PostOutcome};
pub use cache::KeyCache;
pub use client::KmsClient;
pub use config::{
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SESSION_TTL, HttpKmsConfig,
    KmsConfig,
};
pub use decrypt::{decrypt_with_key, encrypt_with_key};
pub use error::{KmsError, RetryClass};
pub use session::KmsSession;
pub use singleflight::Singleflight;
pub use uri::KeyUri;
pub use wire::{Key, KmsRequest, KmsResponse};
