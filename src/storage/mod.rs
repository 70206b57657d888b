// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Store
//!
//! Embedded ACID store backed by redb. Rows are JSON-encoded; ordered
//! queries go through composite-key secondary index tables that are kept in
//! the same write transaction as the row they mirror.
//!
//! Each entity gets a typed repository in [`repository`]; nothing outside
//! this module touches table definitions directly.

pub mod db;
pub mod repository;

pub use db::{Store, StoreError, StoreResult};
pub use repository::accounts::AccountsRepository;
pub use repository::jobs::JobsRepository;
pub use repository::tokens::{StoredToken, TokensRepository};
pub use repository::transfers::{
    StoredTokenTransfer, StoredTransaction, TransactionState, TransferDirection,
    TransfersRepository,
};
