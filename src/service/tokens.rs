// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token operations: vault setup, withdrawals, deposit listings.
//!
//! Withdrawals move tokens out of a custodial account: the admin pays and
//! proposes, the sending account authorizes. Setup creates the vault or
//! collection on the user account. Validation happens before a job row is
//! created, so malformed requests surface as 4xx without queue traffic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::execute_inline;
use super::transactions::{TransactionIntent, TransactionService};
use crate::events::handlers::withdrawal_event_type;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::{Job, JobContext, JobError, JobHandler};
use crate::models::{parse_amount, Address, TokenKind};
use crate::storage::repository::accounts::StoredAccountToken;
use crate::storage::{
    AccountsRepository, JobsRepository, StoreError, StoredToken, StoredTokenTransfer,
    StoredTransaction, TokensRepository, TransferDirection, TransfersRepository,
};
use crate::templates;

pub const JOB_TYPE_TOKEN_SETUP: &str = "token_setup";
pub const JOB_TYPE_FT_WITHDRAWAL: &str = "fungible_withdrawal";
pub const JOB_TYPE_NFT_WITHDRAWAL: &str = "nft_withdrawal";

/// Job attributes for `token_setup`.
#[derive(Debug, Serialize, Deserialize)]
struct SetupAttributes {
    address: Address,
    token_name: String,
}

/// Job attributes for both withdrawal types.
#[derive(Debug, Serialize, Deserialize)]
struct WithdrawalAttributes {
    address: Address,
    token_name: String,
    recipient: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nft_id: Option<u64>,
}

/// A validated withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawalParams {
    pub sender: Address,
    pub token_name: String,
    pub recipient: Address,
    pub amount: Option<String>,
    pub nft_id: Option<u64>,
}

pub struct TokenService {
    tokens: Arc<TokensRepository>,
    accounts: Arc<AccountsRepository>,
    transfers: Arc<TransfersRepository>,
    jobs: Arc<JobsRepository>,
    scheduler: Arc<Scheduler>,
    transactions: Arc<TransactionService>,
}

impl TokenService {
    pub fn new(
        tokens: Arc<TokensRepository>,
        accounts: Arc<AccountsRepository>,
        transfers: Arc<TransfersRepository>,
        jobs: Arc<JobsRepository>,
        scheduler: Arc<Scheduler>,
        transactions: Arc<TransactionService>,
    ) -> Self {
        Self {
            tokens,
            accounts,
            transfers,
            jobs,
            scheduler,
            transactions,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn account_tokens(
        &self,
        address: &Address,
        kind: Option<TokenKind>,
    ) -> Result<Vec<StoredAccountToken>, StoreError> {
        self.accounts.find(address)?;
        self.accounts.list_account_tokens(address, kind)
    }

    pub fn list_transfers(
        &self,
        address: &Address,
        token_name: &str,
        direction: TransferDirection,
    ) -> Result<Vec<StoredTokenTransfer>, StoreError> {
        self.accounts.find(address)?;
        let token = self.tokens.find_by_name(token_name)?;
        self.transfers.list_transfers(address, &token.name, direction)
    }

    pub fn find_transfers(
        &self,
        address: &Address,
        token_name: &str,
        direction: TransferDirection,
        transaction_id: &str,
    ) -> Result<Vec<StoredTokenTransfer>, StoreError> {
        self.accounts.find(address)?;
        let token = self.tokens.find_by_name(token_name)?;
        self.transfers
            .find_transfers(address, &token.name, direction, transaction_id)
    }

    // =========================================================================
    // Vault setup
    // =========================================================================

    /// Validate and queue a vault setup; returns the job.
    pub fn setup_async(
        &self,
        address: &Address,
        token_name: &str,
        kind: TokenKind,
    ) -> Result<Job, StoreError> {
        let token = self.validate_setup(address, token_name, kind)?;

        let attributes = serde_json::to_value(SetupAttributes {
            address: address.clone(),
            token_name: token.name,
        })?;

        let mut job = Job::new(JOB_TYPE_TOKEN_SETUP, attributes);
        self.jobs.insert(&job)?;
        self.scheduler.enqueue(&mut job)?;
        Ok(job)
    }

    /// Run a vault setup within the request; returns the sealed transaction.
    pub async fn setup_sync(
        &self,
        address: &Address,
        token_name: &str,
        kind: TokenKind,
        cancel: CancellationToken,
    ) -> Result<StoredTransaction, JobError> {
        let token = self.validate_setup(address, token_name, kind)?;

        let attributes = serde_json::to_value(SetupAttributes {
            address: address.clone(),
            token_name: token.name,
        })
        .map_err(|e| JobError::Fatal(e.to_string()))?;

        let job = Job::new(JOB_TYPE_TOKEN_SETUP, attributes);
        let job_id = job.id;
        execute_inline(&self.jobs, job, cancel, |ctx| async move {
            self.setup_operation(&ctx).await
        })
        .await?;
        self.transaction_of(&job_id)
    }

    fn validate_setup(
        &self,
        address: &Address,
        token_name: &str,
        kind: TokenKind,
    ) -> Result<StoredToken, StoreError> {
        self.accounts.find(address)?;
        let token = self.tokens.find_by_name(token_name)?;
        if token.kind != kind {
            return Err(StoreError::NotFound(format!("{kind} token {token_name}")));
        }
        Ok(token)
    }

    /// The on-chain setup operation, idempotent under rescue.
    pub async fn setup_operation(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let attributes: SetupAttributes = parse_attributes(ctx)?;
        let token = self.tokens.find_by_name(&attributes.token_name)?;

        let intent = TransactionIntent {
            script: templates::setup_script(&token),
            arguments: Vec::new(),
            authorizers: vec![attributes.address.clone()],
        };
        let sealed = self.transactions.execute(ctx, intent).await?;

        self.accounts
            .insert_account_token(&attributes.address, &token.name, token.kind)?;

        info!(
            address = %attributes.address,
            token = %token.name,
            "token vault set up"
        );
        Ok(json!({ "transaction_id": sealed.transaction_id }))
    }

    // =========================================================================
    // Withdrawals
    // =========================================================================

    /// Validate and queue a withdrawal; returns the job.
    pub fn withdrawal_async(
        &self,
        params: WithdrawalParams,
        kind: TokenKind,
    ) -> Result<Job, JobError> {
        let attributes = self.validate_withdrawal(&params, kind)?;

        let mut job = Job::new(withdrawal_job_type(kind), attributes);
        self.jobs.insert(&job).map_err(JobError::from)?;
        self.scheduler.enqueue(&mut job).map_err(JobError::from)?;
        Ok(job)
    }

    /// Run a withdrawal within the request; returns the sealed transaction.
    pub async fn withdrawal_sync(
        &self,
        params: WithdrawalParams,
        kind: TokenKind,
        cancel: CancellationToken,
    ) -> Result<StoredTransaction, JobError> {
        let attributes = self.validate_withdrawal(&params, kind)?;

        let job = Job::new(withdrawal_job_type(kind), attributes);
        let job_id = job.id;
        execute_inline(&self.jobs, job, cancel, |ctx| async move {
            self.withdrawal_operation(&ctx, kind).await
        })
        .await?;
        self.transaction_of(&job_id)
    }

    fn validate_withdrawal(
        &self,
        params: &WithdrawalParams,
        kind: TokenKind,
    ) -> Result<serde_json::Value, JobError> {
        self.accounts.find(&params.sender)?;
        let token = self.tokens.find_by_name(&params.token_name)?;
        if token.kind != kind {
            return Err(JobError::NotFound(format!(
                "{kind} token {}",
                params.token_name
            )));
        }

        match kind {
            TokenKind::Fungible => {
                let raw = params
                    .amount
                    .as_deref()
                    .ok_or_else(|| JobError::Validation("amount is required".into()))?;
                parse_amount(raw).map_err(|e| JobError::Validation(e.to_string()))?;
            }
            TokenKind::NonFungible => {
                if params.nft_id.is_none() {
                    return Err(JobError::Validation("token_id is required".into()));
                }
            }
        }

        serde_json::to_value(WithdrawalAttributes {
            address: params.sender.clone(),
            token_name: token.name,
            recipient: params.recipient.clone(),
            amount: params.amount.clone(),
            nft_id: params.nft_id,
        })
        .map_err(|e| JobError::Fatal(e.to_string()))
    }

    /// The on-chain withdrawal operation, idempotent under rescue.
    pub async fn withdrawal_operation(
        &self,
        ctx: &JobContext,
        kind: TokenKind,
    ) -> Result<serde_json::Value, JobError> {
        let attributes: WithdrawalAttributes = parse_attributes(ctx)?;
        let token = self.tokens.find_by_name(&attributes.token_name)?;

        let arguments = match kind {
            TokenKind::Fungible => {
                let amount = attributes
                    .amount
                    .as_deref()
                    .ok_or_else(|| JobError::Validation("amount is required".into()))?;
                // Canonical fixed-point form.
                let amount = crate::models::format_amount(
                    parse_amount(amount).map_err(|e| JobError::Validation(e.to_string()))?,
                );
                vec![json!(amount), json!(attributes.recipient.as_str())]
            }
            TokenKind::NonFungible => {
                let id = attributes
                    .nft_id
                    .ok_or_else(|| JobError::Validation("token_id is required".into()))?;
                vec![json!(id), json!(attributes.recipient.as_str())]
            }
        };

        let intent = TransactionIntent {
            script: templates::transfer_script(&token),
            arguments,
            authorizers: vec![attributes.address.clone()],
        };
        let sealed = self.transactions.execute(ctx, intent).await?;

        // The withdrawal's own event pins the index; a transfer row keyed
        // on it stays unique under replay.
        let event_index = sealed
            .events
            .iter()
            .find(|e| e.event_type == withdrawal_event_type(&token))
            .map(|e| e.event_index)
            .unwrap_or(0);

        self.transfers.insert_transfer(&StoredTokenTransfer {
            transaction_id: sealed.transaction_id.clone(),
            event_index,
            token_name: token.name.clone(),
            sender_address: Some(attributes.address.clone()),
            recipient_address: Some(attributes.recipient.clone()),
            amount: attributes.amount.clone(),
            nft_id: attributes.nft_id.map(|id| id.to_string()),
            direction: TransferDirection::Withdrawal,
            created_at: Utc::now(),
        })?;

        info!(
            sender = %attributes.address,
            recipient = %attributes.recipient,
            token = %token.name,
            transaction_id = %sealed.transaction_id,
            "withdrawal sealed"
        );
        Ok(json!({ "transaction_id": sealed.transaction_id }))
    }

    fn transaction_of(&self, job_id: &uuid::Uuid) -> Result<StoredTransaction, JobError> {
        self.transfers
            .find_transaction_by_job(job_id)?
            .ok_or_else(|| JobError::Fatal("job completed without a transaction row".into()))
    }
}

fn withdrawal_job_type(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Fungible => JOB_TYPE_FT_WITHDRAWAL,
        TokenKind::NonFungible => JOB_TYPE_NFT_WITHDRAWAL,
    }
}

fn parse_attributes<T: serde::de::DeserializeOwned>(ctx: &JobContext) -> Result<T, JobError> {
    serde_json::from_value(ctx.attributes())
        .map_err(|e| JobError::Validation(format!("malformed job attributes: {e}")))
}

/// Worker-side adapter for the `token_setup` job type.
pub struct TokenSetupHandler(pub Arc<TokenService>);

#[async_trait]
impl JobHandler for TokenSetupHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        self.0.setup_operation(ctx).await
    }
}

/// Worker-side adapter for the `fungible_withdrawal` job type.
pub struct FungibleWithdrawalHandler(pub Arc<TokenService>);

#[async_trait]
impl JobHandler for FungibleWithdrawalHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        self.0.withdrawal_operation(ctx, TokenKind::Fungible).await
    }
}

/// Worker-side adapter for the `nft_withdrawal` job type.
pub struct NftWithdrawalHandler(pub Arc<TokenService>);

#[async_trait]
impl JobHandler for NftWithdrawalHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        self.0
            .withdrawal_operation(ctx, TokenKind::NonFungible)
            .await
    }
}
