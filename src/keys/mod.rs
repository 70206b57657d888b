// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Management
//!
//! Signer construction for transaction authoring. The admin account key is
//! held in memory from configuration; user account keys are generated on
//! account creation and persisted encrypted (AES-GCM) in the store.
//!
//! Cloud-KMS backends stay behind the same seams ([`Signer`], `Crypter`);
//! only the `local` key type is implemented here, and configuring any other
//! type fails at startup.

pub mod encryption;
pub mod local;
pub mod proposal;

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{HashAlgorithm, SignatureAlgorithm};
use crate::config::Config;
use crate::models::Address;
use crate::storage::repository::accounts::{AccountsRepository, StoredAccountKey};
use crate::storage::StoreError;
use encryption::Crypter;
use local::LocalSigner;

/// Key type identifier for locally held keys.
pub const KEY_TYPE_LOCAL: &str = "local";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Transient backend outage; the operation may be retried.
    #[error("signer backend unavailable: {0}")]
    Unavailable(String),

    #[error("no stored key for account {0}")]
    NotFound(Address),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl KeyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyError::Unavailable(_))
    }
}

impl From<StoreError> for KeyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => KeyError::InvalidKey(format!("missing key row: {what}")),
            other => KeyError::Unavailable(other.to_string()),
        }
    }
}

/// Message signer. Implementations may block on a remote KMS.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError>;
}

/// An account ready to sign: resolved address, key slot, and signer.
#[derive(Clone)]
pub struct Authorizer {
    pub address: Address,
    pub key_index: u32,
    pub signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("address", &self.address)
            .field("key_index", &self.key_index)
            .finish()
    }
}

/// A freshly generated account key, private half not yet persisted.
pub struct GeneratedKey {
    pub public_key: String,
    pub sign_algo: SignatureAlgorithm,
    pub hash_algo: HashAlgorithm,
    signer: LocalSigner,
}

impl GeneratedKey {
    /// Raw private scalar, for encryption at rest.
    pub fn secret_bytes(&self) -> Vec<u8> {
        self.signer.secret_bytes()
    }
}

/// Signer construction for admin and user accounts.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Generate a new account key with the configured defaults.
    async fn generate(&self) -> Result<GeneratedKey, KeyError>;

    /// Persist a generated key for `address`, duplicated across
    /// `key_count` consecutive indices starting at the default index.
    async fn save(
        &self,
        address: &Address,
        key: &GeneratedKey,
        key_count: u32,
    ) -> Result<(), KeyError>;

    async fn admin_authorizer(&self) -> Result<Authorizer, KeyError>;

    async fn user_authorizer(&self, address: &Address) -> Result<Authorizer, KeyError>;
}

/// [`KeyManager`] over locally held keys.
pub struct LocalKeyManager {
    accounts: Arc<AccountsRepository>,
    crypter: Arc<dyn Crypter>,
    admin_address: Address,
    admin_key_index: u32,
    admin_signer: Arc<LocalSigner>,
    default_key_index: u32,
    default_sign_algo: SignatureAlgorithm,
    default_hash_algo: HashAlgorithm,
}

impl LocalKeyManager {
    /// Build the key manager from configuration. Fails when either the
    /// admin or default key type is not `local`, or the admin private key
    /// does not parse.
    pub fn from_config(
        config: &Config,
        accounts: Arc<AccountsRepository>,
        crypter: Arc<dyn Crypter>,
    ) -> Result<Self, KeyError> {
        if config.admin_key_type != KEY_TYPE_LOCAL {
            return Err(KeyError::UnsupportedKeyType(config.admin_key_type.clone()));
        }
        if config.default_key_type != KEY_TYPE_LOCAL {
            return Err(KeyError::UnsupportedKeyType(config.default_key_type.clone()));
        }

        let secret = hex::decode(config.admin_private_key.trim_start_matches("0x"))
            .map_err(|e| KeyError::InvalidKey(format!("admin private key: {e}")))?;
        let admin_signer = LocalSigner::from_secret_bytes(
            config.default_sign_algo,
            config.default_hash_algo,
            &secret,
        )?;

        Ok(Self {
            accounts,
            crypter,
            admin_address: config.admin_address.clone(),
            admin_key_index: config.admin_key_index,
            admin_signer: Arc::new(admin_signer),
            default_key_index: config.default_key_index,
            default_sign_algo: config.default_sign_algo,
            default_hash_algo: config.default_hash_algo,
        })
    }
}

#[async_trait]
impl KeyManager for LocalKeyManager {
    async fn generate(&self) -> Result<GeneratedKey, KeyError> {
        let signer = LocalSigner::generate(self.default_sign_algo, self.default_hash_algo);
        Ok(GeneratedKey {
            public_key: signer.public_key_hex(),
            sign_algo: self.default_sign_algo,
            hash_algo: self.default_hash_algo,
            signer,
        })
    }

    async fn save(
        &self,
        address: &Address,
        key: &GeneratedKey,
        key_count: u32,
    ) -> Result<(), KeyError> {
        let encrypted = self.crypter.encrypt(&key.secret_bytes())?;
        for offset in 0..key_count.max(1) {
            self.accounts.insert_account_key(&StoredAccountKey {
                address: address.clone(),
                key_index: self.default_key_index + offset,
                key_type: KEY_TYPE_LOCAL.to_string(),
                encrypted_value: encrypted.clone(),
                sign_algo: key.sign_algo,
                hash_algo: key.hash_algo,
            })?;
        }
        Ok(())
    }

    async fn admin_authorizer(&self) -> Result<Authorizer, KeyError> {
        Ok(Authorizer {
            address: self.admin_address.clone(),
            key_index: self.admin_key_index,
            signer: self.admin_signer.clone(),
        })
    }

    async fn user_authorizer(&self, address: &Address) -> Result<Authorizer, KeyError> {
        if *address == self.admin_address {
            return self.admin_authorizer().await;
        }

        let stored = self
            .accounts
            .find_account_key(address)
            .map_err(KeyError::from)?
            .ok_or_else(|| KeyError::NotFound(address.clone()))?;

        if stored.key_type != KEY_TYPE_LOCAL {
            return Err(KeyError::UnsupportedKeyType(stored.key_type));
        }

        let secret = self.crypter.decrypt(&stored.encrypted_value)?;
        let signer =
            LocalSigner::from_secret_bytes(stored.sign_algo, stored.hash_algo, &secret)?;

        Ok(Authorizer {
            address: address.clone(),
            key_index: stored.key_index,
            signer: Arc::new(signer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use encryption::AesCrypter;

    fn manager() -> (LocalKeyManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("test.redb"), None).unwrap());
        let accounts = Arc::new(AccountsRepository::new(store));
        let crypter = Arc::new(AesCrypter::new(&[7u8; 32]).unwrap());

        let signer = LocalSigner::generate(SignatureAlgorithm::EcdsaP256, HashAlgorithm::Sha3_256);
        let manager = LocalKeyManager {
            accounts,
            crypter,
            admin_address: "0xf8d6e0586b0a20c7".parse().unwrap(),
            admin_key_index: 0,
            admin_signer: Arc::new(signer),
            default_key_index: 0,
            default_sign_algo: SignatureAlgorithm::EcdsaP256,
            default_hash_algo: HashAlgorithm::Sha3_256,
        };
        (manager, dir)
    }

    #[tokio::test]
    async fn generate_save_and_load_round_trip() {
        let (manager, _dir) = manager();
        let address: Address = "0x0ae53cb6e3f42a79".parse().unwrap();

        // The account row must exist before keys can be attached.
        manager.accounts.insert(&address).unwrap();

        let generated = manager.generate().await.unwrap();
        manager.save(&address, &generated, 1).await.unwrap();

        let authorizer = manager.user_authorizer(&address).await.unwrap();
        assert_eq!(authorizer.address, address);

        // The reconstructed signer signs with the same key.
        let signature = authorizer.signer.sign(b"message").unwrap();
        assert!(!signature.is_empty());
    }

    #[tokio::test]
    async fn user_authorizer_for_admin_address_uses_admin_key() {
        let (manager, _dir) = manager();
        let admin = manager.admin_address.clone();
        let authorizer = manager.user_authorizer(&admin).await.unwrap();
        assert_eq!(authorizer.key_index, manager.admin_key_index);
    }

    #[tokio::test]
    async fn unknown_account_yields_not_found() {
        let (manager, _dir) = manager();
        let unknown: Address = "0x0000000000000001".parse().unwrap();
        let err = manager.user_authorizer(&unknown).await.unwrap_err();
        assert!(matches!(err, KeyError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
