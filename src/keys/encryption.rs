// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encryption of private keys at rest.
//!
//! [`AesCrypter`] seals key material with AES-256-GCM. The ciphertext
//! layout is `nonce (12 bytes) || ciphertext+tag`, so each encryption uses
//! a fresh random nonce and decryption needs nothing but the shared key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use super::KeyError;

const NONCE_LEN: usize = 12;

/// Symmetric encryption seam for stored key values.
pub trait Crypter: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError>;
}

/// AES-256-GCM implementation of [`Crypter`].
pub struct AesCrypter {
    cipher: Aes256Gcm,
}

impl AesCrypter {
    /// Create a crypter from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, KeyError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| KeyError::Crypto("encryption key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    /// Create a crypter from the configured key string: either 64 hex
    /// characters or exactly 32 raw bytes.
    pub fn from_config_key(raw: &str) -> Result<Self, KeyError> {
        if raw.len() == 64 {
            if let Ok(bytes) = hex::decode(raw) {
                return Self::new(&bytes);
            }
        }
        Self::new(raw.as_bytes())
    }
}

impl Crypter for AesCrypter {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| KeyError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        if ciphertext.len() <= NONCE_LEN {
            return Err(KeyError::InvalidKey("ciphertext too short".into()));
        }
        let nonce = Nonce::from_slice(&ciphertext[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &ciphertext[NONCE_LEN..])
            .map_err(|_| KeyError::InvalidKey("decryption failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let crypter = AesCrypter::new(&[3u8; 32]).unwrap();
        let plaintext = b"super secret scalar";

        let sealed = crypter.encrypt(plaintext).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], plaintext.as_slice());

        let opened = crypter.decrypt(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let crypter = AesCrypter::new(&[3u8; 32]).unwrap();
        let a = crypter.encrypt(b"same input").unwrap();
        let b = crypter.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let crypter = AesCrypter::new(&[3u8; 32]).unwrap();
        let mut sealed = crypter.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(crypter.decrypt(&sealed).is_err());
    }

    #[test]
    fn wrong_key_size_is_rejected() {
        assert!(AesCrypter::new(&[1u8; 16]).is_err());
    }

    #[test]
    fn config_key_accepts_hex_and_raw() {
        let hex_key = "00".repeat(32);
        assert!(AesCrypter::from_config_key(&hex_key).is_ok());

        let raw_key = "a".repeat(32);
        assert!(AesCrypter::from_config_key(&raw_key).is_ok());

        assert!(AesCrypter::from_config_key("short").is_err());
    }
}
