// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Locally held ECDSA keys.
//!
//! Supports the two account-key curves (P-256 and secp256k1) combined with
//! SHA2-256 or SHA3-256 message hashing. Public keys are exported as
//! uncompressed SEC1 points, hex encoded, which is the form the chain's
//! account-creation script expects.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};

use super::{KeyError, Signer};
use crate::chain::{HashAlgorithm, SignatureAlgorithm};

enum KeyPair {
    P256(p256::ecdsa::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

/// An in-memory ECDSA keypair.
pub struct LocalSigner {
    keypair: KeyPair,
    hash_algo: HashAlgorithm,
}

impl LocalSigner {
    /// Generate a fresh random keypair.
    pub fn generate(sign_algo: SignatureAlgorithm, hash_algo: HashAlgorithm) -> Self {
        let keypair = match sign_algo {
            SignatureAlgorithm::EcdsaP256 => {
                KeyPair::P256(p256::ecdsa::SigningKey::random(&mut OsRng))
            }
            SignatureAlgorithm::EcdsaSecp256k1 => {
                KeyPair::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng))
            }
        };
        Self { keypair, hash_algo }
    }

    /// Reconstruct a signer from a raw private scalar.
    pub fn from_secret_bytes(
        sign_algo: SignatureAlgorithm,
        hash_algo: HashAlgorithm,
        secret: &[u8],
    ) -> Result<Self, KeyError> {
        let keypair = match sign_algo {
            SignatureAlgorithm::EcdsaP256 => KeyPair::P256(
                p256::ecdsa::SigningKey::from_slice(secret)
                    .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
            ),
            SignatureAlgorithm::EcdsaSecp256k1 => KeyPair::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(secret)
                    .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
            ),
        };
        Ok(Self { keypair, hash_algo })
    }

    /// Raw private scalar bytes.
    pub fn secret_bytes(&self) -> Vec<u8> {
        match &self.keypair {
            KeyPair::P256(key) => key.to_bytes().to_vec(),
            KeyPair::Secp256k1(key) => key.to_bytes().to_vec(),
        }
    }

    /// Uncompressed SEC1 public key, hex, without the leading `04` tag.
    pub fn public_key_hex(&self) -> String {
        let encoded = match &self.keypair {
            KeyPair::P256(key) => key.verifying_key().to_encoded_point(false),
            KeyPair::Secp256k1(key) => key.verifying_key().to_encoded_point(false),
        };
        hex::encode(&encoded.as_bytes()[1..])
    }
}

impl Signer for LocalSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        use k256::ecdsa::signature::DigestSigner;

        let signature = match (&self.keypair, self.hash_algo) {
            (KeyPair::P256(key), HashAlgorithm::Sha2_256) => {
                let signature: p256::ecdsa::Signature =
                    key.sign_digest(Sha256::new_with_prefix(message));
                signature.to_bytes().to_vec()
            }
            (KeyPair::P256(key), HashAlgorithm::Sha3_256) => {
                let signature: p256::ecdsa::Signature =
                    key.sign_digest(Sha3_256::new_with_prefix(message));
                signature.to_bytes().to_vec()
            }
            (KeyPair::Secp256k1(key), HashAlgorithm::Sha2_256) => {
                let signature: k256::ecdsa::Signature =
                    key.sign_digest(Sha256::new_with_prefix(message));
                signature.to_bytes().to_vec()
            }
            (KeyPair::Secp256k1(key), HashAlgorithm::Sha3_256) => {
                let signature: k256::ecdsa::Signature =
                    key.sign_digest(Sha3_256::new_with_prefix(message));
                signature.to_bytes().to_vec()
            }
        };
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_secret_bytes() {
        for sign_algo in [
            SignatureAlgorithm::EcdsaP256,
            SignatureAlgorithm::EcdsaSecp256k1,
        ] {
            let original = LocalSigner::generate(sign_algo, HashAlgorithm::Sha3_256);
            let restored = LocalSigner::from_secret_bytes(
                sign_algo,
                HashAlgorithm::Sha3_256,
                &original.secret_bytes(),
            )
            .unwrap();
            assert_eq!(original.public_key_hex(), restored.public_key_hex());
        }
    }

    #[test]
    fn public_key_is_uncompressed_sec1_without_tag() {
        let signer = LocalSigner::generate(SignatureAlgorithm::EcdsaP256, HashAlgorithm::Sha3_256);
        // 64 bytes = two 32-byte coordinates
        assert_eq!(signer.public_key_hex().len(), 128);
    }

    #[test]
    fn signatures_are_64_bytes() {
        for sign_algo in [
            SignatureAlgorithm::EcdsaP256,
            SignatureAlgorithm::EcdsaSecp256k1,
        ] {
            for hash_algo in [HashAlgorithm::Sha2_256, HashAlgorithm::Sha3_256] {
                let signer = LocalSigner::generate(sign_algo, hash_algo);
                let signature = signer.sign(b"message").unwrap();
                assert_eq!(signature.len(), 64);
            }
        }
    }

    #[test]
    fn invalid_secret_is_rejected() {
        let result = LocalSigner::from_secret_bytes(
            SignatureAlgorithm::EcdsaP256,
            HashAlgorithm::Sha3_256,
            &[0u8; 5],
        );
        assert!(matches!(result, Err(KeyError::InvalidKey(_))));
    }
}
