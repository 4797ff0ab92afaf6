//! Compact JWS payload extraction.
//!
//! The KMS signs some responses instead of encrypting them. Signatures are
//! not verified here: the transport is already authenticated and the
//! payload carries no key material that was not requested over an encrypted
//! channel.

use serde::Deserialize;

use crate::{encoding, error::CryptoError};

/// Number of segments in a compact JWS
pub const JWS_SEGMENTS: usize = 3;

#[derive(Deserialize)]
struct JwsHeader {
    alg: String,
}

/// True if the input has the shape of a compact JWS (three segments).
pub fn is_compact_jws(token: &str) -> bool {
    token.trim().split('.').count() == JWS_SEGMENTS
}

/// Extract the payload of a compact JWS without verifying the signature.
///
/// # Errors
///
/// - `SegmentCount` if the input does not have exactly three segments
/// - `InvalidSegment` if the header or payload is not base64url
/// - `InvalidHeader` if the header is not JSON or has an empty `alg`
pub fn extract_payload(token: &str) -> Result<Vec<u8>, CryptoError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != JWS_SEGMENTS {
        return Err(CryptoError::SegmentCount { expected: JWS_SEGMENTS, actual: segments.len() });
    }

    let header_bytes = encoding::decode(segments[0], "header")?;
    let header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| CryptoError::InvalidHeader { reason: e.to_string() })?;
    if header.alg.is_empty() {
        return Err(CryptoError::InvalidHeader { reason: "empty alg".to_string() });
    }

    encoding::decode(segments[1], "payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(header: &str, payload: &str) -> String {
        format!(
            "{}.{}.{}",
            encoding::encode(header.as_bytes()),
            encoding::encode(payload.as_bytes()),
            encoding::encode(b"signature"),
        )
    }

    #[test]
    fn extracts_payload() {
        let token = signed(r#"{"alg":"RS256"}"#, r#"{"status":200,"requestId":"r1"}"#);

        assert!(is_compact_jws(&token));
        assert_eq!(extract_payload(&token).unwrap(), br#"{"status":200,"requestId":"r1"}"#);
    }

    #[test]
    fn rejects_jwe_shape() {
        let err = extract_payload("a.b.c.d.e").unwrap_err();
        assert_eq!(err, CryptoError::SegmentCount { expected: 3, actual: 5 });
        assert!(!is_compact_jws("a.b.c.d.e"));
    }

    #[test]
    fn rejects_header_without_alg() {
        let token = signed(r#"{"typ":"JWT"}"#, "{}");
        assert!(matches!(extract_payload(&token), Err(CryptoError::InvalidHeader { .. })));

        let token = signed(r#"{"alg":""}"#, "{}");
        assert!(matches!(extract_payload(&token), Err(CryptoError::InvalidHeader { .. })));
    }

    #[test]
    fn rejects_plain_json() {
        assert!(extract_payload(r#"{"status":200}"#).is_err());
    }
}
