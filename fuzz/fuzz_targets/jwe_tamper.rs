//! Fuzz target for JWE integrity
//!
//! Encrypts an arbitrary plaintext, then flips one arbitrary bit of the
//! compact serialization. Decryption must either fail or, if the flip landed
//! in a base64 padding bit that does not change the decoded bytes, return
//! the original plaintext. It must never return anything else.

#![no_main]

use arbitrary::Arbitrary;
use confab_crypto::{decrypt_direct, encrypt_direct};
use libfuzzer_sys::fuzz_target;
use rand::{SeedableRng, rngs::StdRng};

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    plaintext: Vec<u8>,
    kid: Option<String>,
    position: usize,
    bit: u8,
    seed: u64,
}

fuzz_target!(|input: Input| {
    let mut rng = StdRng::seed_from_u64(input.seed);
    let Ok(token) = encrypt_direct(&input.plaintext, &input.key, input.kid.as_deref(), &mut rng)
    else {
        return;
    };

    let mut bytes = token.into_bytes();
    let index = input.position % bytes.len();
    bytes[index] ^= 1 << (input.bit % 8);

    let Ok(tampered) = String::from_utf8(bytes) else {
        return;
    };
    if let Ok(plaintext) = decrypt_direct(&tampered, &input.key) {
        assert_eq!(plaintext, input.plaintext);
    }
});
