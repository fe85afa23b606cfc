//! Field-level encryption for sensitive context values.
//!
//! Ciphertext is `base64(nonce || aes-256-gcm(plaintext))` with a fresh 96-bit nonce per
//! value, so equal plaintexts never produce equal ciphertexts.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key is not valid base64")]
    KeyEncoding,
    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
    #[error("ciphertext is not valid base64")]
    CiphertextEncoding,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("authenticated encryption failed")]
    Seal,
    #[error("ciphertext failed authentication")]
    Open,
    #[error("decrypted value is not valid utf-8")]
    Utf8,
}

/// Reversible protection for individual context values.
pub trait FieldCipher: Send + Sync {
    /// Empty input is returned unchanged.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    /// Empty input is returned unchanged.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

#[derive(Debug)]
pub struct AesGcmCipher {
    key: SecretBox<[u8; KEY_LEN]>,
}

impl AesGcmCipher {
    pub fn from_key_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key: SecretBox::new(Box::new(key)) }
    }

    /// Accepts the base64 form stored in configuration.
    pub fn from_base64_key(encoded: &SecretString) -> Result<Self, CryptoError> {
        let raw = BASE64
            .decode(encoded.expose_secret().trim().as_bytes())
            .map_err(|_| CryptoError::KeyEncoding)?;
        let key: [u8; KEY_LEN] =
            raw.as_slice().try_into().map_err(|_| CryptoError::KeyLength(raw.len()))?;
        Ok(Self::from_key_bytes(key))
    }

    /// Fresh random key in the base64 form accepted by [`AesGcmCipher::from_base64_key`].
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.key.expose_secret()).map_err(|_| CryptoError::KeyLength(0))
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Seal)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);
        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let combined =
            BASE64.decode(ciphertext.as_bytes()).map_err(|_| CryptoError::CiphertextEncoding)?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, sealed) = combined.split_at(NONCE_LEN);
        let opened = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Open)?;
        String::from_utf8(opened).map_err(|_| CryptoError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use crate::crypto::{AesGcmCipher, CryptoError, FieldCipher};

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::from_key_bytes([7u8; 32])
    }

    #[test]
    fn round_trips_arbitrary_text() {
        let cipher = cipher();
        for plaintext in ["1234", "356938035643809", "https://pay.example.com/cs_1?x=y", "ñandú 🚀"]
        {
            let sealed = cipher.encrypt(plaintext).expect("encrypt");
            assert_ne!(sealed, plaintext);
            assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn empty_input_is_identity() {
        let cipher = cipher();
        assert_eq!(cipher.encrypt("").expect("encrypt empty"), "");
        assert_eq!(cipher.decrypt("").expect("decrypt empty"), "");
    }

    #[test]
    fn nonces_make_ciphertexts_distinct() {
        let cipher = cipher();
        let first = cipher.encrypt("4321").expect("encrypt");
        let second = cipher.encrypt("4321").expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_or_tampering_fails_closed() {
        let sealed = cipher().encrypt("4321").expect("encrypt");
        let other = AesGcmCipher::from_key_bytes([9u8; 32]);
        assert_eq!(other.decrypt(&sealed), Err(CryptoError::Open));
        assert_eq!(cipher().decrypt("not base64!"), Err(CryptoError::CiphertextEncoding));
        assert_eq!(cipher().decrypt("AAAA"), Err(CryptoError::Truncated));
    }

    #[test]
    fn base64_keys_are_length_checked() {
        let generated = SecretString::from(AesGcmCipher::generate_key());
        assert!(AesGcmCipher::from_base64_key(&generated).is_ok());

        let short = SecretString::from("c2hvcnQ=".to_owned());
        assert_eq!(AesGcmCipher::from_base64_key(&short).err(), Some(CryptoError::KeyLength(5)));
        let garbage = SecretString::from("%%%".to_owned());
        assert_eq!(AesGcmCipher::from_base64_key(&garbage).err(), Some(CryptoError::KeyEncoding));
    }
}
