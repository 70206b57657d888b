// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Database handle and table layout.
//!
//! ## Table Layout
//!
//! - `accounts`: address → account row
//! - `account_keys`: `address|index` → encrypted key row
//! - `account_tokens`: `address|token` → vault-setup row
//! - `tokens`: lowercase name → token row
//! - `jobs`: uuid → job row
//! - `job_schedule_index`: `state|timestamp_be|uuid` → ()
//! - `transactions`: transaction id → transaction row
//! - `job_transaction_index`: job uuid → transaction id
//! - `token_transfers`: `transaction_id|event_index` → transfer row
//! - `transfer_account_index`: `address|token|direction|tx|idx` → primary key
//! - `chain_event_status`: event type → latest processed height
//! - `meta`: schema metadata (`version`)

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

pub(crate) const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
pub(crate) const ACCOUNT_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("account_keys");
pub(crate) const ACCOUNT_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("account_tokens");
pub(crate) const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");
pub(crate) const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
pub(crate) const JOB_SCHEDULE_INDEX: TableDefinition<&[u8], ()> =
    TableDefinition::new("job_schedule_index");
pub(crate) const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");
pub(crate) const JOB_TRANSACTION_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("job_transaction_index");
pub(crate) const TOKEN_TRANSFERS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("token_transfers");
pub(crate) const TRANSFER_ACCOUNT_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("transfer_account_index");
pub(crate) const CHAIN_EVENT_STATUS: TableDefinition<&str, u64> =
    TableDefinition::new("chain_event_status");
pub(crate) const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "version";

/// Schema version written by this build when none is configured.
const DEFAULT_SCHEMA_VERSION: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency loss: the row advanced since it was read.
    #[error("stale write: row has been updated concurrently")]
    StaleWrite,

    #[error("schema version mismatch: database has {found}, configured {configured}")]
    SchemaVersion { found: String, configured: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Embedded database handle, shared by every repository.
pub struct Store {
    db: Database,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `path`.
    ///
    /// When `configured_version` is set, the stored schema version must
    /// match it; a fresh database records it. This validates deployments
    /// against the data they are pointed at, it does not migrate.
    pub fn open(path: &Path, configured_version: Option<&str>) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(ACCOUNT_KEYS)?;
            let _ = write_txn.open_table(ACCOUNT_TOKENS)?;
            let _ = write_txn.open_table(TOKENS)?;
            let _ = write_txn.open_table(JOBS)?;
            let _ = write_txn.open_table(JOB_SCHEDULE_INDEX)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(JOB_TRANSACTION_INDEX)?;
            let _ = write_txn.open_table(TOKEN_TRANSFERS)?;
            let _ = write_txn.open_table(TRANSFER_ACCOUNT_INDEX)?;
            let _ = write_txn.open_table(CHAIN_EVENT_STATUS)?;

            let mut meta = write_txn.open_table(META)?;
            let stored = meta
                .get(SCHEMA_VERSION_KEY)?
                .map(|guard| guard.value().to_string());
            match (stored, configured_version) {
                (None, version) => {
                    meta.insert(
                        SCHEMA_VERSION_KEY,
                        version.unwrap_or(DEFAULT_SCHEMA_VERSION),
                    )?;
                }
                (Some(found), Some(configured)) if found != configured => {
                    return Err(StoreError::SchemaVersion {
                        found,
                        configured: configured.to_string(),
                    });
                }
                _ => {}
            }
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }
}

/// Big-endian timestamp component for composite index keys, microseconds
/// since the epoch. Lexicographic key order then matches time order.
pub(crate) fn index_timestamp(at: chrono::DateTime<chrono::Utc>) -> [u8; 8] {
    (at.timestamp_micros().max(0) as u64).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb"), None).unwrap();

        // A read transaction over a pre-created table must succeed.
        let read_txn = store.db().begin_read().unwrap();
        assert!(read_txn.open_table(JOBS).is_ok());
        assert!(read_txn.open_table(CHAIN_EVENT_STATUS).is_ok());
    }

    #[test]
    fn schema_version_is_validated_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");

        {
            let _store = Store::open(&path, Some("3")).unwrap();
        }

        // Same version reopens fine.
        {
            let _store = Store::open(&path, Some("3")).unwrap();
        }

        // A different configured version fails fast.
        let err = Store::open(&path, Some("4")).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersion { .. }));

        // No configured version skips the check.
        let _store = Store::open(&path, None).unwrap();
    }

    #[test]
    fn index_timestamp_orders_lexicographically() {
        let earlier = chrono::Utc::now();
        let later = earlier + chrono::Duration::seconds(1);
        assert!(index_timestamp(earlier) < index_timestamp(later));
    }
}
