//! Key derivation: HKDF for session secrets, Concat KDF for ECDH-ES.

use hkdf::Hkdf;
use p256::{PublicKey, SecretKey, ecdh};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Size of the negotiated session secret (AES-256 key)
pub const SESSION_SECRET_SIZE: usize = 32;

/// Derive the session secret from raw key-agreement output.
///
/// HKDF-SHA256 with empty salt and empty info, 32-byte output. The raw ECDH
/// output must never be used as a cipher key directly.
pub fn derive_session_secret(shared_secret: &[u8]) -> Zeroizing<[u8; SESSION_SECRET_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);

    let mut secret = Zeroizing::new([0u8; SESSION_SECRET_SIZE]);
    let Ok(()) = hkdf.expand(&[], &mut secret[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    secret
}

/// ECDH between our private key and the peer's public key, followed by
/// [`derive_session_secret`].
pub fn agree_session_secret(
    private: &SecretKey,
    peer: &PublicKey,
) -> Zeroizing<[u8; SESSION_SECRET_SIZE]> {
    let shared = ecdh::diffie_hellman(private.to_nonzero_scalar(), peer.as_affine());
    derive_session_secret(shared.raw_secret_bytes())
}

/// Raw ECDH output for ECDH-ES content key derivation.
pub(crate) fn ecdh_raw(private: &SecretKey, peer: &PublicKey) -> Zeroizing<Vec<u8>> {
    let shared = ecdh::diffie_hellman(private.to_nonzero_scalar(), peer.as_affine());
    Zeroizing::new(shared.raw_secret_bytes().to_vec())
}

/// Concat KDF (NIST SP 800-56A) with SHA-256 as profiled by RFC 7518
/// section 4.6.2.
///
/// `algorithm_id` is the `enc` value for direct ECDH-ES key agreement.
pub(crate) fn concat_kdf(
    z: &[u8],
    algorithm_id: &str,
    apu: &[u8],
    apv: &[u8],
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    let key_bits = (key_len * 8) as u32;

    let mut other_info = Vec::with_capacity(16 + algorithm_id.len() + apu.len() + apv.len());
    push_length_prefixed(&mut other_info, algorithm_id.as_bytes());
    push_length_prefixed(&mut other_info, apu);
    push_length_prefixed(&mut other_info, apv);
    other_info.extend_from_slice(&key_bits.to_be_bytes());

    let mut output = Zeroizing::new(Vec::with_capacity(key_len + 32));
    let mut counter = 1u32;
    while output.len() < key_len {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(&other_info);
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }

    output.truncate(key_len);
    output
}

fn push_length_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}
