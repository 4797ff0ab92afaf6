//! Fuzz target for KMS response and key URI decoding
//!
//! Responses can arrive as bare JSON over the event transport, so the
//! decoder sees attacker-influenced bytes. Key URIs come from activity
//! payloads.

#![no_main]

use confab_kms::{KeyUri, KmsResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = KmsResponse::from_slice(data) {
        let _ = response.is_success();
        for key in response.into_keys() {
            let _ = key.symmetric_bytes();
        }
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(uri) = KeyUri::parse(text) {
            assert_eq!(uri.to_string(), text);
            assert!(!uri.scheme().is_empty());
            assert!(!uri.domain().is_empty());
            assert!(!uri.path().is_empty());
        }
    }
});
