//! Error types for JOSE operations

use thiserror::Error;

/// Errors from parsing, encrypting, or decrypting JOSE objects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Compact serialization did not have the expected number of segments
    #[error("malformed compact serialization: expected {expected} segments, got {actual}")]
    SegmentCount {
        /// Segments required by the format
        expected: usize,
        /// Segments found in the input
        actual: usize,
    },

    /// A segment could not be decoded or has the wrong size
    #[error("invalid {segment} segment: {reason}")]
    InvalidSegment {
        /// Name of the offending segment
        segment: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Protected header is not valid JSON or lacks required members
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// What was wrong with the header
        reason: String,
    },

    /// Algorithm combination is not accepted on this path
    #[error("unsupported algorithm: alg={alg}, enc={enc}")]
    UnsupportedAlgorithm {
        /// Key management algorithm from the header
        alg: String,
        /// Content encryption algorithm from the header
        enc: String,
    },

    /// Authenticated decryption failed (wrong key or tampered input)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Encryption could not be performed
    #[error("encryption failed: {reason}")]
    EncryptionFailed {
        /// Reason for encryption failure
        reason: String,
    },

    /// Key material is malformed or does not fit the algorithm
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: String,
    },

    /// Key has a different `kty` than the operation requires
    #[error("wrong key type: expected {expected}, got {actual}")]
    WrongKeyType {
        /// Required key type
        expected: &'static str,
        /// Key type that was supplied
        actual: String,
    },
}

impl CryptoError {
    /// Returns true if this error means the ciphertext did not authenticate
    /// under the supplied key.
    ///
    /// Key-exchange callers treat this as a sign that the negotiated session
    /// is no longer valid.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. })
    }
}
