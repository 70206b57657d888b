// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Datatypes exchanged with the chain access node.

use serde::{Deserialize, Serialize};

use crate::models::Address;

/// Key weight granting full signing power over an account.
pub const FULL_KEY_WEIGHT: u32 = 1000;

/// Event emitted by the chain for every newly created account.
/// Payload: `{ "address": "0x…" }`.
pub const ACCOUNT_CREATED_EVENT: &str = "system.AccountCreated";

/// Signature algorithm of an account key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ECDSA_P256")]
    EcdsaP256,
    #[serde(rename = "ECDSA_secp256k1")]
    EcdsaSecp256k1,
}

/// Hash algorithm paired with an account key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA2_256")]
    Sha2_256,
    #[serde(rename = "SHA3_256")]
    Sha3_256,
}

/// One key on an on-chain account, as reported by the access node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountKey {
    pub index: u32,
    /// Uncompressed public key, hex.
    pub public_key: String,
    pub sign_algo: SignatureAlgorithm,
    pub hash_algo: HashAlgorithm,
    pub weight: u32,
    pub sequence_number: u64,
    #[serde(default)]
    pub revoked: bool,
}

/// On-chain account as reported by the access node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainAccount {
    pub address: Address,
    pub balance: u64,
    pub keys: Vec<AccountKey>,
}

/// Header of a finalised block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub id: String,
    pub height: u64,
}

/// A single event emitted by a sealed transaction.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChainEvent {
    /// Fully qualified type, e.g. `0xf8d6….ExampleToken.TokensDeposited`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    pub block_height: u64,
    pub event_index: u32,
    /// Event fields as emitted by the contract.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl ChainEvent {
    /// String field from the event payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    /// Address field from the event payload.
    pub fn payload_address(&self, field: &str) -> Option<Address> {
        self.payload_str(field).and_then(|s| s.parse().ok())
    }
}

/// Execution status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Known to the network but not yet sealed.
    Pending,
    /// Terminal: events are observable, `error` is set on revert.
    Sealed,
}

/// Result of a transaction as reported by the access node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub events: Vec<ChainEvent>,
}

impl TransactionResult {
    pub fn is_sealed(&self) -> bool {
        self.status == TransactionStatus::Sealed
    }

    /// Sealed without an execution error.
    pub fn sealed_ok(&self) -> bool {
        self.is_sealed() && self.error.is_none()
    }
}
