//! Message body encryption under resolved content keys.

use confab_crypto::{CompactJwe, CryptoError, KeyManagement, decrypt_direct, encrypt_direct};
use rand::rngs::OsRng;

use crate::{client::KmsClient, error::KmsError, wire::Key};

impl KmsClient {
    /// Decrypt a message body encrypted under the key at `key_uri`.
    ///
    /// The ciphertext is checked before the key is resolved, so malformed
    /// input never costs a KMS round trip.
    ///
    /// # Errors
    ///
    /// - `Crypto` for malformed ciphertext, algorithms other than
    ///   `dir`/`A256GCM`, a non-`oct` key, or a tag mismatch
    /// - Key resolution errors from [`get_key`](Self::get_key)
    /// - `InvalidPlaintext` if the content is not UTF-8
    pub async fn decrypt_text(&self, key_uri: &str, ciphertext: &str) -> Result<String, KmsError> {
        let jwe = CompactJwe::parse(ciphertext)?;
        if jwe.key_management()? != KeyManagement::Direct {
            return Err(CryptoError::UnsupportedAlgorithm {
                alg: jwe.header().alg.clone(),
                enc: jwe.header().enc.clone(),
            }
            .into());
        }

        let key = self.get_key(key_uri).await?;
        decrypt_with_key(&key, ciphertext)
    }

    /// Encrypt `plaintext` under the key at `key_uri`. The key URI is
    /// recorded as `kid`.
    ///
    /// # Errors
    ///
    /// - Key resolution errors from [`get_key`](Self::get_key)
    /// - `Crypto` if the key is not a 32-byte `oct` key
    pub async fn encrypt_text(&self, key_uri: &str, plaintext: &str) -> Result<String, KmsError> {
        let key = self.get_key(key_uri).await?;
        encrypt_with_key(&key, plaintext)
    }
}

/// Decrypt a `dir` + `A256GCM` body with an already resolved key.
///
/// # Errors
///
/// - `MissingKeyMaterial` if the key carries no JWK
/// - `Crypto` as for [`KmsClient::decrypt_text`]
/// - `InvalidPlaintext` if the content is not UTF-8
pub fn decrypt_with_key(key: &Key, ciphertext: &str) -> Result<String, KmsError> {
    let secret = key.symmetric_bytes()?;
    let plaintext = decrypt_direct(ciphertext, &secret)?;
    String::from_utf8(plaintext).map_err(|_| KmsError::InvalidPlaintext)
}

/// Encrypt a body with an already resolved key.
///
/// # Errors
///
/// - `MissingKeyMaterial` if the key carries no JWK
/// - `Crypto` if the key is not a 32-byte `oct` key
pub fn encrypt_with_key(key: &Key, plaintext: &str) -> Result<String, KmsError> {
    let secret = key.symmetric_bytes()?;
    Ok(encrypt_direct(plaintext.as_bytes(), &secret, Some(&key.uri), &mut OsRng)?)
}

#[cfg(test)]
mod tests {
    use confab_crypto::{EcSecretKey, Jwk};

    use super::*;

    fn content_key() -> Key {
        Key::new("kms://kms.example.com/keys/1", Jwk::symmetric(&[9; 32]))
    }

    #[test]
    fn roundtrip_with_resolved_key() {
        let key = content_key();
        let token = encrypt_with_key(&key, "héllo wörld").unwrap();
        assert_eq!(decrypt_with_key(&key, &token).unwrap(), "héllo wörld");
    }

    #[test]
    fn non_symmetric_key_rejected() {
        let ec = EcSecretKey::random(&mut OsRng);
        let key = Key::new("kms://d/ec", Jwk::from_p256(&ec.public_key()));
        let token = encrypt_with_key(&content_key(), "x").unwrap();

        assert!(matches!(
            decrypt_with_key(&key, &token),
            Err(KmsError::Crypto(CryptoError::WrongKeyType { .. }))
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let token = encrypt_with_key(&content_key(), "x").unwrap();
        let other = Key::new("kms://d/other", Jwk::symmetric(&[8; 32]));
        let err = decrypt_with_key(&other, &token).unwrap_err();
        assert!(matches!(err, KmsError::Crypto(e) if e.is_decryption_failure()));
    }

    #[test]
    fn non_utf8_plaintext_rejected() {
        let key = content_key();
        let token = encrypt_direct(&[0xff, 0xfe], &[9; 32], None, &mut OsRng).unwrap();
        assert_eq!(decrypt_with_key(&key, &token).unwrap_err(), KmsError::InvalidPlaintext);
    }
}
