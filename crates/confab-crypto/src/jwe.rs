//! JWE compact serialization (RFC 7516) with AES-256-GCM content encryption.
//!
//! Three key management modes are supported:
//!
//! - `dir`: the caller's 32-byte key is the content key (message bodies and
//!   KMS traffic under an established session)
//! - `RSA-OAEP`: a random content key wrapped under the KMS RSA key (the
//!   first handshake message)
//! - `ECDH-ES`: the content key is agreed with an ephemeral P-256 key carried
//!   in the `epk` header (the KMS handshake response)
//!
//! Wire format, five base64url segments joined by `.`:
//!
//! ```text
//! protected-header . encrypted-key . iv . ciphertext . tag
//! ```
//!
//! The protected header segment, as transmitted, is the AAD.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use p256::{PublicKey, SecretKey};
use rand::{CryptoRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::{encoding, error::CryptoError, jwk::Jwk, kdf};

/// Direct use of a shared symmetric key
pub const ALG_DIR: &str = "dir";

/// RSAES OAEP (SHA-1, MGF1 with SHA-1) key transport
pub const ALG_RSA_OAEP: &str = "RSA-OAEP";

/// Ephemeral-static ECDH direct key agreement
pub const ALG_ECDH_ES: &str = "ECDH-ES";

/// AES-256-GCM content encryption
pub const ENC_A256GCM: &str = "A256GCM";

/// Number of segments in a compact JWE
pub const JWE_SEGMENTS: usize = 5;

/// AES-GCM IV size (96 bits)
const IV_SIZE: usize = 12;

/// AES-GCM tag size (128 bits)
const TAG_SIZE: usize = 16;

/// AES-256 content key size
const CEK_SIZE: usize = 32;

/// JOSE protected header of a JWE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm
    pub alg: String,
    /// Content encryption algorithm
    pub enc: String,
    /// Key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Ephemeral public key (`ECDH-ES` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,
    /// Agreement `PartyUInfo` (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    /// Agreement `PartyVInfo` (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
}

impl JweHeader {
    fn new(alg: &str) -> Self {
        Self {
            alg: alg.to_string(),
            enc: ENC_A256GCM.to_string(),
            kid: None,
            epk: None,
            apu: None,
            apv: None,
        }
    }
}

/// Supported key management modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagement {
    /// `dir`
    Direct,
    /// `RSA-OAEP`
    RsaOaep,
    /// `ECDH-ES`
    EcdhEs,
}

impl KeyManagement {
    /// Wire name of the algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => ALG_DIR,
            Self::RsaOaep => ALG_RSA_OAEP,
            Self::EcdhEs => ALG_ECDH_ES,
        }
    }

    fn from_alg(alg: &str) -> Option<Self> {
        match alg {
            ALG_DIR => Some(Self::Direct),
            ALG_RSA_OAEP => Some(Self::RsaOaep),
            ALG_ECDH_ES => Some(Self::EcdhEs),
            _ => None,
        }
    }
}

/// Key material for [`CompactJwe::decrypt`].
#[derive(Clone, Copy)]
pub enum DecryptionKey<'a> {
    /// Shared symmetric key (`dir`)
    Symmetric(&'a [u8]),
    /// Static or ephemeral EC private key (`ECDH-ES`)
    Ec(&'a SecretKey),
    /// RSA private key (`RSA-OAEP`)
    Rsa(&'a RsaPrivateKey),
}

/// A parsed compact JWE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactJwe {
    header: JweHeader,
    protected: String,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl CompactJwe {
    /// Parse and validate the shape of a compact JWE.
    ///
    /// Does not check which algorithms are used; see
    /// [`CompactJwe::key_management`].
    ///
    /// # Errors
    ///
    /// - `SegmentCount` if the input does not have exactly five segments
    /// - `InvalidSegment` if a segment is not base64url or has the wrong size
    /// - `InvalidHeader` if the header is not a JSON object with `alg`/`enc`
    pub fn parse(token: &str) -> Result<Self, CryptoError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != JWE_SEGMENTS {
            return Err(CryptoError::SegmentCount {
                expected: JWE_SEGMENTS,
                actual: segments.len(),
            });
        }

        let header_bytes = encoding::decode(segments[0], "header")?;
        let header: JweHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| CryptoError::InvalidHeader { reason: e.to_string() })?;

        let encrypted_key = encoding::decode(segments[1], "encrypted key")?;
        let iv = encoding::decode(segments[2], "iv")?;
        let ciphertext = encoding::decode(segments[3], "ciphertext")?;
        let tag = encoding::decode(segments[4], "tag")?;

        if iv.len() != IV_SIZE {
            return Err(CryptoError::InvalidSegment {
                segment: "iv",
                reason: format!("expected {IV_SIZE} bytes, got {}", iv.len()),
            });
        }
        if tag.len() != TAG_SIZE {
            return Err(CryptoError::InvalidSegment {
                segment: "tag",
                reason: format!("expected {TAG_SIZE} bytes, got {}", tag.len()),
            });
        }

        Ok(Self {
            header,
            protected: segments[0].to_string(),
            encrypted_key,
            iv,
            ciphertext,
            tag,
        })
    }

    /// Protected header.
    pub fn header(&self) -> &JweHeader {
        &self.header
    }

    /// Key management mode, if the `alg`/`enc` pair is supported.
    ///
    /// # Errors
    ///
    /// - `UnsupportedAlgorithm` for anything but `dir`, `RSA-OAEP`, or
    ///   `ECDH-ES` with `A256GCM`
    pub fn key_management(&self) -> Result<KeyManagement, CryptoError> {
        let mode = KeyManagement::from_alg(&self.header.alg);
        match mode {
            Some(mode) if self.header.enc == ENC_A256GCM => Ok(mode),
            _ => Err(CryptoError::UnsupportedAlgorithm {
                alg: self.header.alg.clone(),
                enc: self.header.enc.clone(),
            }),
        }
    }

    /// Decrypt with the given key material.
    ///
    /// # Errors
    ///
    /// - `UnsupportedAlgorithm` if the header names an unsupported algorithm
    /// - `InvalidKey` if the key does not match the header's `alg`
    /// - `DecryptionFailed` if the content key cannot be recovered or the tag
    ///   does not authenticate
    pub fn decrypt(&self, key: DecryptionKey<'_>) -> Result<Vec<u8>, CryptoError> {
        let mode = self.key_management()?;

        let cek: Zeroizing<Vec<u8>> = match (mode, key) {
            (KeyManagement::Direct, DecryptionKey::Symmetric(key)) => {
                if !self.encrypted_key.is_empty() {
                    return Err(CryptoError::InvalidSegment {
                        segment: "encrypted key",
                        reason: "must be empty for dir".to_string(),
                    });
                }
                Zeroizing::new(key.to_vec())
            },
            (KeyManagement::RsaOaep, DecryptionKey::Rsa(private)) => {
                let cek = private
                    .decrypt(Oaep::new::<Sha1>(), &self.encrypted_key)
                    .map_err(|e| CryptoError::DecryptionFailed { reason: e.to_string() })?;
                Zeroizing::new(cek)
            },
            (KeyManagement::EcdhEs, DecryptionKey::Ec(private)) => {
                let epk = self.header.epk.as_ref().ok_or_else(|| CryptoError::InvalidHeader {
                    reason: "ECDH-ES header without epk".to_string(),
                })?;
                let z = kdf::ecdh_raw(private, &epk.to_p256()?);
                let apu = optional_segment(self.header.apu.as_deref(), "apu")?;
                let apv = optional_segment(self.header.apv.as_deref(), "apv")?;
                kdf::concat_kdf(&z, &self.header.enc, &apu, &apv, CEK_SIZE)
            },
            (mode, _) => {
                return Err(CryptoError::InvalidKey {
                    reason: format!("key does not match alg {}", mode.as_str()),
                });
            },
        };

        self.open(&cek)
    }

    fn open(&self, cek: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cek.len() != CEK_SIZE {
            return Err(CryptoError::InvalidKey {
                reason: format!("content key is {} bytes, expected {CEK_SIZE}", cek.len()),
            });
        }

        let cipher = Aes256Gcm::new_from_slice(cek)
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })?;

        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        cipher
            .decrypt(
                Nonce::from_slice(&self.iv),
                Payload { msg: &sealed, aad: self.protected.as_bytes() },
            )
            .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
    }
}

/// Encrypt with `dir` + `A256GCM` under a 32-byte key.
///
/// # Errors
///
/// - `InvalidKey` if the key is not 32 bytes
pub fn encrypt_direct<R: CryptoRng + RngCore>(
    plaintext: &[u8],
    key: &[u8],
    kid: Option<&str>,
    rng: &mut R,
) -> Result<String, CryptoError> {
    let mut header = JweHeader::new(ALG_DIR);
    header.kid = kid.map(str::to_string);
    seal(&header, key, &[], plaintext, rng)
}

/// Decrypt a message body: only `dir` + `A256GCM` is accepted.
///
/// # Errors
///
/// - `SegmentCount` / `InvalidSegment` / `InvalidHeader` for malformed input
/// - `UnsupportedAlgorithm` for any other algorithm pair
/// - `DecryptionFailed` if the tag does not authenticate
pub fn decrypt_direct(token: &str, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let jwe = CompactJwe::parse(token)?;
    if jwe.key_management()? != KeyManagement::Direct {
        return Err(CryptoError::UnsupportedAlgorithm {
            alg: jwe.header.alg.clone(),
            enc: jwe.header.enc.clone(),
        });
    }
    jwe.decrypt(DecryptionKey::Symmetric(key))
}

/// Encrypt with `RSA-OAEP` + `A256GCM` to an RSA public key.
///
/// # Errors
///
/// - `EncryptionFailed` if the RSA key cannot wrap a 32-byte content key
pub fn encrypt_rsa_oaep<R: CryptoRng + RngCore>(
    plaintext: &[u8],
    recipient: &RsaPublicKey,
    kid: Option<&str>,
    rng: &mut R,
) -> Result<String, CryptoError> {
    let mut cek = Zeroizing::new([0u8; CEK_SIZE]);
    rng.fill_bytes(&mut cek[..]);

    let encrypted_key = recipient
        .encrypt(rng, Oaep::new::<Sha1>(), &cek[..])
        .map_err(|e| CryptoError::EncryptionFailed { reason: e.to_string() })?;

    let mut header = JweHeader::new(ALG_RSA_OAEP);
    header.kid = kid.map(str::to_string);
    seal(&header, &cek[..], &encrypted_key, plaintext, rng)
}

/// Encrypt with `ECDH-ES` + `A256GCM` to a P-256 public key.
///
/// A fresh ephemeral key is generated and published in the `epk` header.
///
/// # Errors
///
/// - `InvalidKey` if the derived content key is rejected by the cipher
pub fn encrypt_ecdh_es<R: CryptoRng + RngCore>(
    plaintext: &[u8],
    recipient: &PublicKey,
    rng: &mut R,
) -> Result<String, CryptoError> {
    let ephemeral = SecretKey::random(&mut *rng);
    let z = kdf::ecdh_raw(&ephemeral, recipient);
    let cek = kdf::concat_kdf(&z, ENC_A256GCM, &[], &[], CEK_SIZE);

    let mut header = JweHeader::new(ALG_ECDH_ES);
    header.epk = Some(Jwk::from_p256(&ephemeral.public_key()));
    seal(&header, &cek, &[], plaintext, rng)
}

fn seal<R: CryptoRng + RngCore>(
    header: &JweHeader,
    cek: &[u8],
    encrypted_key: &[u8],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<String, CryptoError> {
    if cek.len() != CEK_SIZE {
        return Err(CryptoError::InvalidKey {
            reason: format!("content key is {} bytes, expected {CEK_SIZE}", cek.len()),
        });
    }

    let header_json = serde_json::to_vec(header)
        .map_err(|e| CryptoError::EncryptionFailed { reason: e.to_string() })?;
    let protected = encoding::encode(&header_json);

    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(cek)
        .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: protected.as_bytes() })
        .map_err(|e| CryptoError::EncryptionFailed { reason: e.to_string() })?;

    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(format!(
        "{protected}.{}.{}.{}.{}",
        encoding::encode(encrypted_key),
        encoding::encode(&iv),
        encoding::encode(&sealed),
        encoding::encode(&tag),
    ))
}

fn optional_segment(value: Option<&str>, name: &'static str) -> Result<Vec<u8>, CryptoError> {
    value.map_or_else(|| Ok(Vec::new()), |v| encoding::decode(v, name))
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn test_key(seed: u8) -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        key
    }

    #[test]
    fn direct_roundtrip() {
        let key = test_key(1);
        let token = encrypt_direct(b"Hello, World!", &key, None, &mut OsRng).unwrap();

        assert_eq!(token.split('.').count(), JWE_SEGMENTS);
        assert_eq!(decrypt_direct(&token, &key).unwrap(), b"Hello, World!");
    }

    #[test]
    fn direct_has_empty_encrypted_key_and_kid() {
        let key = test_key(1);
        let token = encrypt_direct(b"x", &key, Some("kms://example.com/ecdhe/1"), &mut OsRng)
            .unwrap();

        let segments: Vec<&str> = token.split('.').collect();
        assert!(segments[1].is_empty());

        let jwe = CompactJwe::parse(&token).unwrap();
        let header = jwe.header();
        assert_eq!(header.alg, ALG_DIR);
        assert_eq!(header.enc, ENC_A256GCM);
        assert_eq!(header.kid.as_deref(), Some("kms://example.com/ecdhe/1"));
    }

    #[test]
    fn wrong_key_fails() {
        let token = encrypt_direct(b"secret", &test_key(1), None, &mut OsRng).unwrap();

        let err = decrypt_direct(&token, &test_key(2)).unwrap_err();
        assert!(err.is_decryption_failure());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key(3);
        let token = encrypt_direct(b"original message", &key, None, &mut OsRng).unwrap();

        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut ciphertext = encoding::decode(&segments[3], "ciphertext").unwrap();
        ciphertext[0] ^= 0xFF;
        segments[3] = encoding::encode(&ciphertext);

        let err = decrypt_direct(&segments.join("."), &key).unwrap_err();
        assert!(err.is_decryption_failure());
    }

    #[test]
    fn tampered_header_fails() {
        let key = test_key(3);
        let token = encrypt_direct(b"message", &key, Some("a"), &mut OsRng).unwrap();

        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        let forged = JweHeader { kid: Some("b".to_string()), ..JweHeader::new(ALG_DIR) };
        segments[0] = encoding::encode(&serde_json::to_vec(&forged).unwrap());

        let err = decrypt_direct(&segments.join("."), &key).unwrap_err();
        assert!(err.is_decryption_failure(), "header is authenticated as AAD");
    }

    #[test]
    fn wrong_segment_count_fails() {
        for token in ["", "a.b", "a.b.c", "a.b.c.d", "a.b.c.d.e.f"] {
            let err = decrypt_direct(token, &test_key(0)).unwrap_err();
            assert!(matches!(err, CryptoError::SegmentCount { expected: 5, .. }), "{token}");
        }
    }

    #[test]
    fn undecodable_segment_fails() {
        let key = test_key(0);
        let token = encrypt_direct(b"x", &key, None, &mut OsRng).unwrap();
        let broken = token.replacen('.', ".!!!.", 1).replacen("..", ".", 1);

        assert!(decrypt_direct(&broken, &key).is_err());
    }

    #[test]
    fn short_iv_rejected() {
        let header = encoding::encode(br#"{"alg":"dir","enc":"A256GCM"}"#);
        let token =
            format!("{header}..{}.{}.{}", encoding::encode(&[0; 8]), "", encoding::encode(&[0; 16]));

        let err = CompactJwe::parse(&token).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSegment { segment: "iv", .. }));
    }

    #[test]
    fn direct_path_rejects_other_algorithms() {
        let secret = SecretKey::random(&mut OsRng);
        let token = encrypt_ecdh_es(b"x", &secret.public_key(), &mut OsRng).unwrap();

        let err = decrypt_direct(&token, &test_key(0)).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn unsupported_enc_rejected() {
        let key = test_key(0);
        let token = encrypt_direct(b"x", &key, None, &mut OsRng).unwrap();
        let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
        segments[0] = encoding::encode(br#"{"alg":"dir","enc":"A128CBC-HS256"}"#);

        let err = decrypt_direct(&segments.join("."), &key).unwrap_err();
        assert_eq!(
            err,
            CryptoError::UnsupportedAlgorithm {
                alg: "dir".to_string(),
                enc: "A128CBC-HS256".to_string()
            }
        );
    }

    #[test]
    fn ecdh_es_roundtrip() {
        let recipient = SecretKey::random(&mut OsRng);
        let token = encrypt_ecdh_es(b"{\"status\":201}", &recipient.public_key(), &mut OsRng)
            .unwrap();

        let jwe = CompactJwe::parse(&token).unwrap();
        assert_eq!(jwe.key_management().unwrap(), KeyManagement::EcdhEs);
        assert!(jwe.header().epk.is_some());
        assert_eq!(jwe.decrypt(DecryptionKey::Ec(&recipient)).unwrap(), b"{\"status\":201}");
    }

    #[test]
    fn ecdh_es_wrong_recipient_fails() {
        let recipient = SecretKey::random(&mut OsRng);
        let other = SecretKey::random(&mut OsRng);
        let token = encrypt_ecdh_es(b"x", &recipient.public_key(), &mut OsRng).unwrap();

        let jwe = CompactJwe::parse(&token).unwrap();
        assert!(jwe.decrypt(DecryptionKey::Ec(&other)).unwrap_err().is_decryption_failure());
    }

    #[test]
    fn mismatched_key_kind_rejected() {
        let recipient = SecretKey::random(&mut OsRng);
        let token = encrypt_ecdh_es(b"x", &recipient.public_key(), &mut OsRng).unwrap();

        let jwe = CompactJwe::parse(&token).unwrap();
        let key = test_key(0);
        assert!(matches!(
            jwe.decrypt(DecryptionKey::Symmetric(&key)),
            Err(CryptoError::InvalidKey { .. })
        ));
    }

    #[test]
    fn direct_rejects_short_key() {
        let err = encrypt_direct(b"x", &[0u8; 16], None, &mut OsRng).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey { .. }));
    }
}
