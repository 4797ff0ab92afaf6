//! Confab Cryptographic Primitives
//!
//! JOSE building blocks for the key-exchange protocol and for message
//! payload encryption. Functions are pure apart from randomness, which the
//! caller supplies as an RNG so tests can run deterministically.
//!
//! # Key Lifecycle
//!
//! A session with the key management service (KMS) starts with an
//! asymmetric handshake and ends in a symmetric secret that wraps every
//! later request. Resolved content keys then decrypt message bodies.
//!
//! ```text
//! Ephemeral P-256 keypair ──► RSA-OAEP JWE ──► KMS
//!                                                │
//!        ECDH-ES JWE (KMS ephemeral public key) ◄┘
//!        │
//!        ▼
//! ECDH → HKDF-SHA256 → Session Secret (32 bytes)
//!        │
//!        ▼
//! "dir" + A256GCM JWE → KMS requests / responses → Content Keys
//!        │
//!        ▼
//! "dir" + A256GCM JWE → Message Bodies
//! ```
//!
//! # Security
//!
//! - Raw ECDH output is never used as a key. It always passes through HKDF
//!   (session secrets) or Concat KDF (ECDH-ES content keys).
//! - Every JWE is authenticated with AES-256-GCM; the protected header is the
//!   additional authenticated data.
//! - Secrets are returned in [`zeroize::Zeroizing`] wrappers.
//! - [`jws::extract_payload`] does NOT verify signatures. Callers only use it
//!   for KMS responses that arrive over an already authenticated channel.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod encoding;
mod error;
pub mod jwe;
pub mod jwk;
pub mod jws;
pub mod kdf;

pub use error::CryptoError;
pub use jwe::{
    ALG_DIR, ALG_ECDH_ES, ALG_RSA_OAEP, CompactJwe, DecryptionKey, ENC_A256GCM, JweHeader,
    KeyManagement, decrypt_direct, encrypt_direct, encrypt_ecdh_es, encrypt_rsa_oaep,
};
pub use jwk::Jwk;
pub use kdf::{SESSION_SECRET_SIZE, agree_session_secret, derive_session_secret};
pub use p256::{PublicKey as EcPublicKey, SecretKey as EcSecretKey};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
