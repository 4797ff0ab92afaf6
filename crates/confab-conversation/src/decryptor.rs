//! Content decryption seam.

use async_trait::async_trait;
use confab_kms::{KmsClient, KmsError};

/// Decrypts activity content under a key URI.
#[async_trait]
pub trait ContentDecryptor: Send + Sync {
    /// Plaintext of `ciphertext`, encrypted under the key at `key_uri`.
    async fn decrypt(&self, key_uri: &str, ciphertext: &str) -> Result<String, KmsError>;
}

#[async_trait]
impl ContentDecryptor for KmsClient {
    async fn decrypt(&self, key_uri: &str, ciphertext: &str) -> Result<String, KmsError> {
        self.decrypt_text(key_uri, ciphertext).await
    }
}
