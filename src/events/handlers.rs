// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deposit crediting.
//!
//! One handler instance watches the deposit event of every enabled token.
//! Events whose recipient is a custodial account become `TokenTransfer`
//! rows keyed `(transaction_id, event_index)`; everything else is ignored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{ChainEventHandler, EventHandlerError};
use crate::chain::ChainEvent;
use crate::models::TokenKind;
use crate::storage::{
    AccountsRepository, StoredToken, StoredTokenTransfer, TransferDirection, TransfersRepository,
};

/// Deposit event name for fungible tokens.
pub const FT_DEPOSIT_EVENT: &str = "TokensDeposited";
/// Deposit event name for non-fungible tokens.
pub const NFT_DEPOSIT_EVENT: &str = "Deposit";

/// Fully qualified deposit event type for a token.
pub fn deposit_event_type(token: &StoredToken) -> String {
    let event_name = match token.kind {
        TokenKind::Fungible => FT_DEPOSIT_EVENT,
        TokenKind::NonFungible => NFT_DEPOSIT_EVENT,
    };
    format!("{}.{}.{}", token.address, token.name, event_name)
}

/// Withdrawal event type, used to locate the event index of an outgoing
/// transfer inside a sealed transaction.
pub fn withdrawal_event_type(token: &StoredToken) -> String {
    let event_name = match token.kind {
        TokenKind::Fungible => "TokensWithdrawn",
        TokenKind::NonFungible => "Withdraw",
    };
    format!("{}.{}.{}", token.address, token.name, event_name)
}

pub struct DepositHandler {
    tokens: Vec<StoredToken>,
    accounts: Arc<AccountsRepository>,
    transfers: Arc<TransfersRepository>,
}

impl DepositHandler {
    pub fn new(
        tokens: Vec<StoredToken>,
        accounts: Arc<AccountsRepository>,
        transfers: Arc<TransfersRepository>,
    ) -> Self {
        Self {
            tokens,
            accounts,
            transfers,
        }
    }

    fn token_for(&self, event_type: &str) -> Option<&StoredToken> {
        self.tokens
            .iter()
            .find(|token| deposit_event_type(token) == event_type)
    }
}

#[async_trait]
impl ChainEventHandler for DepositHandler {
    fn event_types(&self) -> Vec<String> {
        self.tokens.iter().map(deposit_event_type).collect()
    }

    async fn handle(&self, event: &ChainEvent) -> Result<(), EventHandlerError> {
        let Some(token) = self.token_for(&event.event_type) else {
            return Ok(());
        };

        let Some(recipient) = event.payload_address("to") else {
            debug!(event_type = %event.event_type, "deposit event without recipient");
            return Ok(());
        };

        if !self.accounts.exists(&recipient)? {
            return Ok(());
        }

        let (amount, nft_id) = match token.kind {
            TokenKind::Fungible => {
                let Some(amount) = event.payload_str("amount") else {
                    return Err(EventHandlerError::Malformed(format!(
                        "{} event without amount",
                        event.event_type
                    )));
                };
                (Some(amount.to_string()), None)
            }
            TokenKind::NonFungible => {
                let Some(id) = event.payload.get("id") else {
                    return Err(EventHandlerError::Malformed(format!(
                        "{} event without id",
                        event.event_type
                    )));
                };
                // Contracts emit the id as either a number or a string.
                let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
                (None, Some(id))
            }
        };

        let inserted = self.transfers.insert_transfer(&StoredTokenTransfer {
            transaction_id: event.transaction_id.clone(),
            event_index: event.event_index,
            token_name: token.name.clone(),
            sender_address: event.payload_address("from"),
            recipient_address: Some(recipient.clone()),
            amount,
            nft_id,
            direction: TransferDirection::Deposit,
            created_at: Utc::now(),
        })?;

        if inserted {
            tracing::info!(
                transaction_id = %event.transaction_id,
                recipient = %recipient,
                token = %token.name,
                "deposit credited"
            );
        } else {
            debug!(
                transaction_id = %event.transaction_id,
                event_index = event.event_index,
                "deposit already credited"
            );
        }
        Ok(())
    }
}
