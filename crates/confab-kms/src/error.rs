//! Error types for the key exchange engine

use confab_crypto::CryptoError;
use thiserror::Error;

/// How a failed key request should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The negotiated session is no longer accepted; renegotiate first
    SessionInvalid,
    /// Retry once on the same session
    Transient,
}

/// Errors from key exchange and key resolution.
///
/// `Clone` so that every caller waiting on one in-flight resolution receives
/// the same error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KmsError {
    /// Key URI is not of the form `scheme://domain/path`
    #[error("invalid key uri {uri:?}: {reason}")]
    InvalidUri {
        /// The URI as given
        uri: String,
        /// Which part was missing
        reason: String,
    },

    /// HTTP call failed or returned an unexpected status
    #[error("http error{}: {reason}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Transport or server error message
        reason: String,
    },

    /// KMS answered with a non-success status inside its response payload
    #[error("kms status {status}: {reason}")]
    Status {
        /// Status code from the KMS payload
        status: u16,
        /// Reason from the KMS payload
        reason: String,
    },

    /// No response arrived within the response timeout
    #[error("timed out waiting for kms response to {request_id}")]
    Timeout {
        /// Correlation id of the unanswered request
        request_id: String,
    },

    /// JOSE processing failed
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Response could not be decoded or lacks a required member
    #[error("malformed kms response: {reason}")]
    MalformedResponse {
        /// What was wrong with the response
        reason: String,
    },

    /// KMS response carried no key for the requested URI
    #[error("kms returned no key for {uri}")]
    KeyNotFound {
        /// Requested key URI
        uri: String,
    },

    /// Key has no JWK attached
    #[error("key {uri} has no key material")]
    MissingKeyMaterial {
        /// Key URI
        uri: String,
    },

    /// Decrypted content is not valid UTF-8
    #[error("decrypted content is not utf-8")]
    InvalidPlaintext,

    /// Identity lookup failed
    #[error("identity lookup failed: {reason}")]
    Identity {
        /// Why the caller's identity could not be resolved
        reason: String,
    },

    /// Internal invariant failure (delivery channel dropped, etc.)
    #[error("internal error: {reason}")]
    Internal {
        /// What went wrong
        reason: String,
    },
}

impl KmsError {
    /// Classify for the single retry in key resolution.
    ///
    /// Status 400, 401, or 403 (from HTTP or from the KMS payload) and a
    /// failure to decrypt a response mean the KMS no longer recognises our
    /// session. Everything else is retried as is.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http { status: Some(status), .. } | Self::Status { status, .. }
                if matches!(*status, 400 | 401 | 403) =>
            {
                RetryClass::SessionInvalid
            },
            Self::Crypto(e) if e.is_decryption_failure() => RetryClass::SessionInvalid,
            _ => RetryClass::Transient,
        }
    }
}

impl From<reqwest::Error> for KmsError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http { status: e.status().map(|s| s.as_u16()), reason: e.to_string() }
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedResponse { reason: e.to_string() }
    }
}
