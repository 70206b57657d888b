// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain integration: access node client, datatypes, and the transaction
//! build/sign path.

pub mod client;
pub mod transactions;
pub mod types;

pub use client::{AccessClient, ChainError, HttpAccessClient};
pub use transactions::{
    sign_transaction, BuildError, ProposalKeyRef, SignedTransaction, Transaction,
    TransactionBuilder, TransactionSignature,
};
pub use types::{
    AccountKey, BlockHeader, ChainEvent, HashAlgorithm, OnChainAccount, SignatureAlgorithm,
    TransactionResult, TransactionStatus, ACCOUNT_CREATED_EVENT, FULL_KEY_WEIGHT,
};
