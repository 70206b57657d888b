// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account repository: custodial accounts, their encrypted keys, and
//! vault-setup records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::db::{Store, StoreError, StoreResult, ACCOUNTS, ACCOUNT_KEYS, ACCOUNT_TOKENS};
use crate::chain::{HashAlgorithm, SignatureAlgorithm};
use crate::models::{Address, TokenKind};

/// A custodial account managed by this service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredAccount {
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An encrypted account key at one key index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccountKey {
    pub address: Address,
    pub key_index: u32,
    pub key_type: String,
    /// AES-GCM sealed private scalar.
    pub encrypted_value: Vec<u8>,
    pub sign_algo: SignatureAlgorithm,
    pub hash_algo: HashAlgorithm,
}

/// A vault-setup record: the account can hold this token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredAccountToken {
    pub address: Address,
    pub token_name: String,
    pub token_kind: TokenKind,
    pub created_at: DateTime<Utc>,
}

pub struct AccountsRepository {
    store: Arc<Store>,
}

fn key_row_key(address: &Address, key_index: u32) -> String {
    format!("{address}|{key_index:010}")
}

fn account_token_key(address: &Address, token_name: &str) -> String {
    format!("{address}|{}", token_name.to_lowercase())
}

impl AccountsRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, address: &Address) -> StoreResult<StoredAccount> {
        let now = Utc::now();
        let account = StoredAccount {
            address: address.clone(),
            created_at: now,
            updated_at: now,
        };
        let row = serde_json::to_vec(&account)?;

        let write_txn = self.store.db().begin_write()?;
        {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            if accounts.get(address.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("account {address}")));
            }
            accounts.insert(address.as_str(), row.as_slice())?;
        }
        write_txn.commit()?;
        Ok(account)
    }

    pub fn find(&self, address: &Address) -> StoreResult<StoredAccount> {
        let read_txn = self.store.db().begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;
        let guard = accounts
            .get(address.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("account {address}")))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    pub fn exists(&self, address: &Address) -> StoreResult<bool> {
        let read_txn = self.store.db().begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;
        Ok(accounts.get(address.as_str())?.is_some())
    }

    /// Accounts ordered by address, with offset pagination. `limit == 0`
    /// returns everything.
    pub fn list(&self, limit: usize, offset: usize) -> StoreResult<Vec<StoredAccount>> {
        let read_txn = self.store.db().begin_read()?;
        let accounts = read_txn.open_table(ACCOUNTS)?;

        let mut result = Vec::new();
        for (position, entry) in accounts.iter()?.enumerate() {
            let entry = entry?;
            if position < offset {
                continue;
            }
            if limit > 0 && result.len() >= limit {
                break;
            }
            result.push(serde_json::from_slice(entry.1.value())?);
        }
        Ok(result)
    }

    pub fn insert_account_key(&self, key: &StoredAccountKey) -> StoreResult<()> {
        let row = serde_json::to_vec(key)?;
        let row_key = key_row_key(&key.address, key.key_index);

        let write_txn = self.store.db().begin_write()?;
        {
            let mut keys = write_txn.open_table(ACCOUNT_KEYS)?;
            keys.insert(row_key.as_str(), row.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The account's lowest-index stored key.
    pub fn find_account_key(&self, address: &Address) -> StoreResult<Option<StoredAccountKey>> {
        let prefix = format!("{address}|");
        let prefix_end = format!("{address}~"); // '~' sorts after '|'

        let read_txn = self.store.db().begin_read()?;
        let keys = read_txn.open_table(ACCOUNT_KEYS)?;
        let mut range = keys.range(prefix.as_str()..prefix_end.as_str())?;

        match range.next() {
            Some(entry) => {
                let entry = entry?;
                Ok(Some(serde_json::from_slice(entry.1.value())?))
            }
            None => Ok(None),
        }
    }

    /// Record that `address` can hold `token_name`. Idempotent.
    pub fn insert_account_token(
        &self,
        address: &Address,
        token_name: &str,
        token_kind: TokenKind,
    ) -> StoreResult<StoredAccountToken> {
        let record = StoredAccountToken {
            address: address.clone(),
            token_name: token_name.to_string(),
            token_kind,
            created_at: Utc::now(),
        };
        let row_key = account_token_key(address, token_name);

        let write_txn = self.store.db().begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNT_TOKENS)?;
            if let Some(existing) = table.get(row_key.as_str())? {
                return Ok(serde_json::from_slice(existing.value())?);
            }
            let row = serde_json::to_vec(&record)?;
            table.insert(row_key.as_str(), row.as_slice())?;
        }
        write_txn.commit()?;
        Ok(record)
    }

    pub fn has_account_token(&self, address: &Address, token_name: &str) -> StoreResult<bool> {
        let row_key = account_token_key(address, token_name);
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(ACCOUNT_TOKENS)?;
        Ok(table.get(row_key.as_str())?.is_some())
    }

    pub fn list_account_tokens(
        &self,
        address: &Address,
        kind: Option<TokenKind>,
    ) -> StoreResult<Vec<StoredAccountToken>> {
        let prefix = format!("{address}|");
        let prefix_end = format!("{address}~");

        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(ACCOUNT_TOKENS)?;

        let mut result = Vec::new();
        for entry in table.range(prefix.as_str()..prefix_end.as_str())? {
            let entry = entry?;
            let record: StoredAccountToken = serde_json::from_slice(entry.1.value())?;
            if kind.map(|k| k == record.token_kind).unwrap_or(true) {
                result.push(record);
            }
        }
        Ok(result)
    }
}
