//! Base64url helpers shared by the JOSE modules.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::CryptoError;

pub(crate) fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode one segment of a compact serialization.
///
/// Trailing `=` padding is tolerated; some producers emit it despite RFC 7515.
pub(crate) fn decode(segment: &str, name: &'static str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidSegment { segment: name, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_padding() {
        assert_eq!(decode("aGk=", "test").unwrap(), b"hi");
        assert_eq!(decode("aGk", "test").unwrap(), b"hi");
    }

    #[test]
    fn decode_rejects_standard_alphabet() {
        let err = decode("a+b/", "iv").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSegment { segment: "iv", .. }));
    }
}
