// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account lifecycle operations.
//!
//! Account creation is an on-chain transaction: generate a key, submit the
//! creation script with the admin paying, read the new address from the
//! `AccountCreated` event, then persist the account row and its encrypted
//! key. The operation is written once and driven either by a worker (async)
//! or inline (`use-sync`).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::execute_inline;
use super::transactions::{TransactionIntent, TransactionService};
use crate::jobs::scheduler::Scheduler;
use crate::jobs::{Job, JobContext, JobError, JobHandler};
use crate::keys::KeyManager;
use crate::models::Address;
use crate::storage::repository::accounts::StoredAccount;
use crate::storage::{AccountsRepository, JobsRepository, StoreError, StoredTransaction};
use crate::chain::ACCOUNT_CREATED_EVENT;

pub const JOB_TYPE_CREATE_ACCOUNT: &str = "create_account";

pub struct AccountService {
    accounts: Arc<AccountsRepository>,
    jobs: Arc<JobsRepository>,
    scheduler: Arc<Scheduler>,
    key_manager: Arc<dyn KeyManager>,
    transactions: Arc<TransactionService>,
    create_account_script: String,
    default_account_key_count: u32,
    /// Weight applied to every key added by the creation script.
    key_weight: u32,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<AccountsRepository>,
        jobs: Arc<JobsRepository>,
        scheduler: Arc<Scheduler>,
        key_manager: Arc<dyn KeyManager>,
        transactions: Arc<TransactionService>,
        create_account_script: String,
        default_account_key_count: u32,
        key_weight: u32,
    ) -> Self {
        Self {
            accounts,
            jobs,
            scheduler,
            key_manager,
            transactions,
            create_account_script,
            default_account_key_count,
            key_weight,
        }
    }

    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredAccount>, StoreError> {
        self.accounts.list(limit, offset)
    }

    pub fn details(&self, address: &Address) -> Result<StoredAccount, StoreError> {
        self.accounts.find(address)
    }

    /// Queue account creation; returns the job for the client to poll.
    pub fn create_async(&self) -> Result<Job, StoreError> {
        let mut job = Job::new(JOB_TYPE_CREATE_ACCOUNT, json!({}));
        self.jobs.insert(&job)?;
        self.scheduler.enqueue(&mut job)?;
        Ok(job)
    }

    /// Create an account within the request, returning the finished row.
    pub async fn create_sync(
        &self,
        cancel: CancellationToken,
    ) -> Result<StoredAccount, JobError> {
        let job = Job::new(JOB_TYPE_CREATE_ACCOUNT, json!({}));
        let done = execute_inline(&self.jobs, job, cancel, |ctx| async move {
            self.create_account_operation(&ctx).await
        })
        .await?;

        let address = done
            .result
            .as_ref()
            .and_then(|r| r.get("address"))
            .and_then(|a| a.as_str())
            .and_then(|a| a.parse::<Address>().ok())
            .ok_or_else(|| JobError::Fatal("account creation produced no address".into()))?;
        Ok(self.accounts.find(&address)?)
    }

    /// The on-chain operation, safe to re-enter after a crash.
    pub async fn create_account_operation(
        &self,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, JobError> {
        // Rescue path: the transaction already went out in a previous
        // attempt. If the account row made it too, the job just finishes;
        // if not, the generated private key died with the worker and the
        // on-chain account cannot be adopted.
        if let Some(sealed) = self.transactions.resume(ctx).await? {
            let address = created_address(&sealed)?;
            if self.accounts.exists(&address)? {
                return Ok(json!({ "address": address }));
            }
            return Err(JobError::Fatal(format!(
                "account {address} was created on chain but its key material was lost"
            )));
        }

        let generated = self.key_manager.generate().await?;
        let public_keys: Vec<String> = std::iter::repeat(generated.public_key.clone())
            .take(self.default_account_key_count.max(1) as usize)
            .collect();

        let intent = TransactionIntent {
            script: self.create_account_script.clone(),
            arguments: vec![json!(public_keys), json!(self.key_weight)],
            authorizers: Vec::new(),
        };
        let sealed = self.transactions.execute(ctx, intent).await?;
        let address = created_address(&sealed)?;

        match self.accounts.insert(&address) {
            Ok(_) => {}
            // Idempotent under replay.
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.key_manager
            .save(&address, &generated, self.default_account_key_count)
            .await?;

        info!(address = %address, "account created");
        Ok(json!({ "address": address }))
    }
}

/// The new account's address from the creation transaction's events.
fn created_address(sealed: &StoredTransaction) -> Result<Address, JobError> {
    sealed
        .events
        .iter()
        .find(|e| e.event_type == ACCOUNT_CREATED_EVENT)
        .and_then(|e| e.payload_address("address"))
        .ok_or_else(|| {
            JobError::Fatal(format!(
                "transaction {} sealed without an {ACCOUNT_CREATED_EVENT} event",
                sealed.transaction_id
            ))
        })
}

/// Worker-side adapter for the `create_account` job type.
pub struct CreateAccountHandler(pub Arc<AccountService>);

#[async_trait]
impl JobHandler for CreateAccountHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        self.0.create_account_operation(ctx).await
    }
}
