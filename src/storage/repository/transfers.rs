// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transactions, token transfers, and event-listener watermarks.
//!
//! Token transfers are keyed `transaction_id|event_index`, which is what
//! makes deposit crediting idempotent: replaying an event window can never
//! produce a second row for the same on-chain event. A per-account
//! composite index (`address|token|direction|…`) serves the
//! withdrawal/deposit listings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::super::db::{
    Store, StoreError, StoreResult, CHAIN_EVENT_STATUS, JOB_TRANSACTION_INDEX, TOKEN_TRANSFERS,
    TRANSACTIONS, TRANSFER_ACCOUNT_INDEX,
};
use crate::chain::ChainEvent;
use crate::models::Address;

/// Chain-side lifecycle of a persisted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    SealedOk,
    SealedError,
}

/// A transaction produced by a job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    pub transaction_id: String,
    pub job_id: Uuid,
    pub payer_address: Address,
    pub proposer_address: Address,
    pub authorizers: Vec<Address>,
    pub script_hash: String,
    pub state: TransactionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub events: Vec<ChainEvent>,
    pub created_at: DateTime<Utc>,
}

/// Direction of a token transfer relative to the custodial account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Withdrawal,
    Deposit,
}

impl TransferDirection {
    fn tag(self) -> &'static str {
        match self {
            TransferDirection::Withdrawal => "withdrawal",
            TransferDirection::Deposit => "deposit",
        }
    }
}

/// One fungible or non-fungible token movement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredTokenTransfer {
    pub transaction_id: String,
    pub event_index: u32,
    pub token_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<Address>,
    /// Fungible amount, fixed-point decimal string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Non-fungible token id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nft_id: Option<String>,
    pub direction: TransferDirection,
    pub created_at: DateTime<Utc>,
}

impl StoredTokenTransfer {
    /// The account whose listing this transfer appears under.
    fn account(&self) -> Option<&Address> {
        match self.direction {
            TransferDirection::Withdrawal => self.sender_address.as_ref(),
            TransferDirection::Deposit => self.recipient_address.as_ref(),
        }
    }
}

fn transfer_key(transaction_id: &str, event_index: u32) -> String {
    format!("{transaction_id}|{event_index:010}")
}

fn account_index_key(
    address: &Address,
    token_name: &str,
    direction: TransferDirection,
    transaction_id: &str,
    event_index: u32,
) -> String {
    format!(
        "{address}|{}|{}|{transaction_id}|{event_index:010}",
        token_name.to_lowercase(),
        direction.tag()
    )
}

pub struct TransfersRepository {
    store: Arc<Store>,
}

impl TransfersRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Insert or update a transaction row, maintaining the job index.
    pub fn upsert_transaction(&self, tx: &StoredTransaction) -> StoreResult<()> {
        let row = serde_json::to_vec(tx)?;
        let job_id = tx.job_id.to_string();

        let write_txn = self.store.db().begin_write()?;
        {
            let mut transactions = write_txn.open_table(TRANSACTIONS)?;
            transactions.insert(tx.transaction_id.as_str(), row.as_slice())?;

            let mut job_index = write_txn.open_table(JOB_TRANSACTION_INDEX)?;
            job_index.insert(job_id.as_str(), tx.transaction_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_transaction(&self, transaction_id: &str) -> StoreResult<Option<StoredTransaction>> {
        let read_txn = self.store.db().begin_read()?;
        let transactions = read_txn.open_table(TRANSACTIONS)?;
        match transactions.get(transaction_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_transaction_by_job(&self, job_id: &Uuid) -> StoreResult<Option<StoredTransaction>> {
        let key = job_id.to_string();
        let read_txn = self.store.db().begin_read()?;
        let job_index = read_txn.open_table(JOB_TRANSACTION_INDEX)?;

        let Some(tx_id) = job_index.get(key.as_str())?.map(|g| g.value().to_string()) else {
            return Ok(None);
        };
        drop(job_index);

        let transactions = read_txn.open_table(TRANSACTIONS)?;
        match transactions.get(tx_id.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Token transfers
    // =========================================================================

    /// Insert a transfer keyed by `(transaction_id, event_index)`.
    ///
    /// Returns `false` when the row already exists, which makes window
    /// replay a no-op.
    pub fn insert_transfer(&self, transfer: &StoredTokenTransfer) -> StoreResult<bool> {
        let primary = transfer_key(&transfer.transaction_id, transfer.event_index);
        let row = serde_json::to_vec(transfer)?;

        let write_txn = self.store.db().begin_write()?;
        let inserted = {
            let mut transfers = write_txn.open_table(TOKEN_TRANSFERS)?;
            if transfers.get(primary.as_str())?.is_some() {
                false
            } else {
                transfers.insert(primary.as_str(), row.as_slice())?;

                if let Some(account) = transfer.account() {
                    let mut index = write_txn.open_table(TRANSFER_ACCOUNT_INDEX)?;
                    let index_key = account_index_key(
                        account,
                        &transfer.token_name,
                        transfer.direction,
                        &transfer.transaction_id,
                        transfer.event_index,
                    );
                    index.insert(index_key.as_str(), primary.as_str())?;
                }
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Transfers for one account and token, filtered by direction.
    pub fn list_transfers(
        &self,
        address: &Address,
        token_name: &str,
        direction: TransferDirection,
    ) -> StoreResult<Vec<StoredTokenTransfer>> {
        let prefix = format!(
            "{address}|{}|{}|",
            token_name.to_lowercase(),
            direction.tag()
        );
        let prefix_end = format!("{}\u{7f}", prefix);

        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(TRANSFER_ACCOUNT_INDEX)?;
        let transfers = read_txn.open_table(TOKEN_TRANSFERS)?;

        let mut result = Vec::new();
        for entry in index.range(prefix.as_str()..prefix_end.as_str())? {
            let entry = entry?;
            if let Some(guard) = transfers.get(entry.1.value())? {
                result.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(result)
    }

    /// Transfers of one transaction under an account listing.
    pub fn find_transfers(
        &self,
        address: &Address,
        token_name: &str,
        direction: TransferDirection,
        transaction_id: &str,
    ) -> StoreResult<Vec<StoredTokenTransfer>> {
        Ok(self
            .list_transfers(address, token_name, direction)?
            .into_iter()
            .filter(|t| t.transaction_id == transaction_id)
            .collect())
    }

    // =========================================================================
    // Event watermarks
    // =========================================================================

    /// Highest definitively processed block for one event type; zero when
    /// the listener has never run.
    pub fn get_event_height(&self, event_type: &str) -> StoreResult<u64> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(CHAIN_EVENT_STATUS)?;
        Ok(table.get(event_type)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Advance the watermark. Never moves backwards.
    pub fn set_event_height(&self, event_type: &str, height: u64) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut table = write_txn.open_table(CHAIN_EVENT_STATUS)?;
            let current = table.get(event_type)?.map(|g| g.value()).unwrap_or(0);
            if height > current {
                table.insert(event_type, height)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}
