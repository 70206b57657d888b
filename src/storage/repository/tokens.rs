// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token registry.
//!
//! Tokens are configuration entities seeded from `ENABLED_TOKENS` at
//! startup. Lookups are case-insensitive on the token name; a missing
//! token is a typed [`StoreError::NotFound`], never a message probe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::db::{Store, StoreError, StoreResult, TOKENS};
use crate::models::{Address, TokenKind};

/// A token this service knows how to set up and transfer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredToken {
    /// Contract name, case preserved for script rendering.
    pub name: String,
    /// Contract account address.
    pub address: Address,
    pub kind: TokenKind,
    pub created_at: DateTime<Utc>,
}

pub struct TokensRepository {
    store: Arc<Store>,
}

impl TokensRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert or replace a token by name.
    pub fn upsert(&self, token: &StoredToken) -> StoreResult<()> {
        let key = token.name.to_lowercase();
        let row = serde_json::to_vec(token)?;

        let write_txn = self.store.db().begin_write()?;
        {
            let mut tokens = write_txn.open_table(TOKENS)?;
            tokens.insert(key.as_str(), row.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<StoredToken> {
        let key = name.to_lowercase();
        let read_txn = self.store.db().begin_read()?;
        let tokens = read_txn.open_table(TOKENS)?;
        let guard = tokens
            .get(key.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("token {name}")))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    pub fn list(&self, kind: Option<TokenKind>) -> StoreResult<Vec<StoredToken>> {
        let read_txn = self.store.db().begin_read()?;
        let tokens = read_txn.open_table(TOKENS)?;

        let mut result = Vec::new();
        for entry in tokens.iter()? {
            let entry = entry?;
            let token: StoredToken = serde_json::from_slice(entry.1.value())?;
            if kind.map(|k| k == token.kind).unwrap_or(true) {
                result.push(token);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (TokensRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("test.redb"), None).unwrap());
        (TokensRepository::new(store), dir)
    }

    fn token(name: &str, kind: TokenKind) -> StoredToken {
        StoredToken {
            name: name.to_string(),
            address: "0xf8d6e0586b0a20c7".parse().unwrap(),
            kind,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let (repo, _dir) = repo();
        repo.upsert(&token("ExampleToken", TokenKind::Fungible)).unwrap();

        let found = repo.find_by_name("exampletoken").unwrap();
        // Case of the stored name is preserved for script rendering.
        assert_eq!(found.name, "ExampleToken");
    }

    #[test]
    fn missing_token_is_typed_not_found() {
        let (repo, _dir) = repo();
        assert!(matches!(
            repo.find_by_name("Nothing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_filters_by_kind() {
        let (repo, _dir) = repo();
        repo.upsert(&token("ExampleToken", TokenKind::Fungible)).unwrap();
        repo.upsert(&token("Collectible", TokenKind::NonFungible)).unwrap();

        assert_eq!(repo.list(None).unwrap().len(), 2);
        let fts = repo.list(Some(TokenKind::Fungible)).unwrap();
        assert_eq!(fts.len(), 1);
        assert_eq!(fts[0].name, "ExampleToken");
    }

    #[test]
    fn upsert_replaces() {
        let (repo, _dir) = repo();
        repo.upsert(&token("ExampleToken", TokenKind::Fungible)).unwrap();

        let mut replacement = token("ExampleToken", TokenKind::Fungible);
        replacement.address = "0x0ae53cb6e3f42a79".parse().unwrap();
        repo.upsert(&replacement).unwrap();

        let found = repo.find_by_name("ExampleToken").unwrap();
        assert_eq!(found.address.as_str(), "0x0ae53cb6e3f42a79");
        assert_eq!(repo.list(None).unwrap().len(), 1);
    }
}
