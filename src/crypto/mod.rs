//! AES-256-GCM encryption for secrets at rest.
//!
//! OAuth client secrets, refresh tokens, access tokens and API keys are
//! encrypted before they reach the database. Each value is encrypted with a
//! fresh random nonce and stored as a single text token:
//!
//! ```text
//! base64(nonce):base64(ciphertext)
//! ```
//!
//! The 256-bit key is the SHA-256 digest of a process-wide secret supplied
//! through the environment. There is no key rotation or versioning: changing
//! the secret makes every stored token undecryptable.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Shortest secret accepted for key derivation
pub const MIN_SECRET_LEN: usize = 16;

const SEPARATOR: char = ':';

/// Encryption errors
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoError {
    /// Secret too short to derive a key from
    WeakSecret(usize),
    /// Token is not of the form `iv:ciphertext`
    Format(String),
    /// Token is well-formed but cannot be decrypted
    Decrypt(String),
    /// Cipher failure while encrypting
    Encrypt(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::WeakSecret(len) => write!(
                f,
                "encryption secret must be at least {} characters, got {}",
                MIN_SECRET_LEN, len
            ),
            CryptoError::Format(msg) => write!(f, "invalid encrypted token format: {}", msg),
            CryptoError::Decrypt(msg) => write!(f, "decryption failed: {}", msg),
            CryptoError::Encrypt(msg) => write!(f, "encryption failed: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Symmetric cipher for secret columns.
///
/// Cheap to clone; holds only the derived key.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").field("key", &"<redacted>").finish()
    }
}

impl SecretCipher {
    /// Derives the cipher key from a process-wide secret.
    ///
    /// # Errors
    /// * `CryptoError::WeakSecret` - If the secret is shorter than `MIN_SECRET_LEN`
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(CryptoError::WeakSecret(secret.chars().count()));
        }

        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);

        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Encrypt(format!("failed to create cipher: {}", e)))
    }

    /// Encrypts plaintext with a random nonce.
    ///
    /// Two calls with the same plaintext produce different tokens.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher()?;

        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(format!(
            "{}{}{}",
            BASE64.encode(nonce),
            SEPARATOR,
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypts a token produced by [`SecretCipher::encrypt`].
    ///
    /// # Errors
    /// * `CryptoError::Format` - Missing separator, extra separators, or empty parts
    /// * `CryptoError::Decrypt` - Bad encoding, wrong key, or tampered data
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let (iv, ciphertext) = token
            .split_once(SEPARATOR)
            .ok_or_else(|| CryptoError::Format("missing ':' separator".to_string()))?;

        if iv.is_empty() || ciphertext.is_empty() || ciphertext.contains(SEPARATOR) {
            return Err(CryptoError::Format(
                "expected exactly two non-empty parts".to_string(),
            ));
        }

        let nonce_bytes = BASE64
            .decode(iv)
            .map_err(|e| CryptoError::Decrypt(format!("invalid iv encoding: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::Decrypt(format!(
                "invalid iv size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let ciphertext_bytes = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::Decrypt(format!("invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext_bytes.as_ref())
            .map_err(|_| CryptoError::Decrypt("wrong key or corrupted data".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_secret("unit-test-secret-0123456789").unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let cipher = cipher();
        let long = "x".repeat(4096);
        for plaintext in ["", "refresh-token-123", "ünïcødé ✓", "a:b:c", long.as_str()] {
            let token = cipher.encrypt(plaintext).unwrap();
            assert_ne!(token, plaintext);
            assert_eq!(cipher.decrypt(&token).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_token_has_single_separator() {
        let token = cipher().encrypt("client-secret").unwrap();
        assert_eq!(token.matches(':').count(), 1);
    }

    #[test]
    fn test_random_iv_per_call() {
        let cipher = cipher();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "same");
        assert_eq!(cipher.decrypt(&second).unwrap(), "same");
    }

    #[test]
    fn test_missing_separator_is_format_error() {
        let err = cipher().decrypt("bm90LWEtdG9rZW4").unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
    }

    #[test]
    fn test_extra_separator_is_format_error() {
        let token = cipher().encrypt("value").unwrap();
        let err = cipher().decrypt(&format!("{}:extra", token)).unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));

        let err = cipher().decrypt(":abc").unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::from_secret("a-completely-different-secret").unwrap();
        assert!(matches!(other.decrypt(&token), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher();
        let token = cipher.encrypt("secret").unwrap();
        let (iv, ciphertext) = token.split_once(':').unwrap();
        let mut bytes = BASE64.decode(ciphertext).unwrap();
        bytes[0] ^= 0xff;
        let tampered = format!("{}:{}", iv, BASE64.encode(bytes));
        assert!(matches!(cipher.decrypt(&tampered), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_bad_iv_size_fails() {
        let cipher = cipher();
        let token = cipher.encrypt("secret").unwrap();
        let (_, ciphertext) = token.split_once(':').unwrap();
        let short_iv = BASE64.encode([0u8; 8]);
        let err = cipher.decrypt(&format!("{}:{}", short_iv, ciphertext)).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert_eq!(
            SecretCipher::from_secret("short").unwrap_err(),
            CryptoError::WeakSecret(5)
        );
        assert!(SecretCipher::from_secret(&"k".repeat(MIN_SECRET_LEN)).is_ok());
    }

    #[test]
    fn test_same_secret_same_key() {
        let a = SecretCipher::from_secret("shared-secret-value-42").unwrap();
        let b = SecretCipher::from_secret("shared-secret-value-42").unwrap();
        let token = a.encrypt("portable").unwrap();
        assert_eq!(b.decrypt(&token).unwrap(), "portable");
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", cipher());
        assert!(rendered.contains("<redacted>"));
    }
}
