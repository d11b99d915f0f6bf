//! Secrets at rest with AES-256-GCM
//!
//! Store API credentials and webhook secrets are encrypted with a single
//! 32-byte master key loaded at startup.
//!
//! Format: base64(nonce_12bytes || ciphertext || tag_16bytes)

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Failure kinds for encrypt/decrypt. Variants are distinguishable so
/// callers can report configuration errors separately from tampered data;
/// none of them carry key material.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption key must be exactly {KEY_LEN} bytes")]
    InvalidKeyLength,
    #[error("ciphertext is malformed or truncated")]
    Malformed,
    #[error("ciphertext failed authentication (wrong key or tampered data)")]
    AuthenticationFailed,
    #[error("decrypted data is not valid UTF-8")]
    NotUtf8,
}

/// Master encryption key (32 bytes for AES-256-GCM)
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; KEY_LEN],
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl MasterKey {
    pub fn new(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Load the key from its base64 form (env/secret storage).
    pub fn from_base64(b64: &str) -> Result<Self, CipherError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|_| CipherError::InvalidKeyLength)?;
        Self::new(&bytes)
    }

    /// Encrypt plaintext → base64(nonce || ciphertext || tag)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        // nonce || ciphertext (includes tag)
        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    /// Decrypt base64(nonce || ciphertext || tag) → plaintext
    pub fn decrypt(&self, encrypted_b64: &str) -> Result<Vec<u8>, CipherError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64.trim())
            .map_err(|_| CipherError::Malformed)?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Malformed);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let ciphertext = &data[NONCE_LEN..];

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::AuthenticationFailed)
    }

    /// Encrypt a string → base64 blob
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CipherError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt base64 blob → string
    pub fn decrypt_str(&self, encrypted_b64: &str) -> Result<String, CipherError> {
        let bytes = self.decrypt(encrypted_b64)?;
        String::from_utf8(bytes).map_err(|_| CipherError::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn key() -> MasterKey {
        MasterKey::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trip() {
        let k = key();
        let blob = k.encrypt_str("consumer-secret-42").unwrap();
        assert_eq!(k.decrypt_str(&blob).unwrap(), "consumer-secret-42");
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(matches!(
            MasterKey::new(&[0u8; 16]),
            Err(CipherError::InvalidKeyLength)
        ));
        assert!(matches!(
            MasterKey::new(&[0u8; 33]),
            Err(CipherError::InvalidKeyLength)
        ));
        assert!(matches!(
            MasterKey::from_base64("not base64!!"),
            Err(CipherError::InvalidKeyLength)
        ));
    }

    #[test]
    fn fresh_nonce_per_call() {
        let k = key();
        let a = k.encrypt_str("same plaintext").unwrap();
        let b = k.encrypt_str("same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn flipping_any_byte_fails_authentication() {
        let k = key();
        let blob = k.encrypt_str("payload").unwrap();
        let engine = base64::engine::general_purpose::STANDARD;
        let data = engine.decode(&blob).unwrap();

        for i in 0..data.len() {
            let mut tampered = data.clone();
            tampered[i] ^= 0x01;
            let result = k.decrypt(&engine.encode(&tampered));
            assert!(
                matches!(result, Err(CipherError::AuthenticationFailed)),
                "byte {i} flip must not decrypt"
            );
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let blob = key().encrypt_str("payload").unwrap();
        let other = MasterKey::new(&[8u8; KEY_LEN]).unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let k = key();
        assert!(matches!(k.decrypt(""), Err(CipherError::Malformed)));
        // shorter than nonce + tag
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        assert!(matches!(k.decrypt(&short), Err(CipherError::Malformed)));
        assert!(matches!(k.decrypt("%%%"), Err(CipherError::Malformed)));
    }
}
