// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The shared submission pipeline.
//!
//! Every on-chain operation funnels through [`TransactionService::execute`]:
//! lease a proposal key, wait for a send permit, build and sign, submit,
//! persist the transaction id, await the seal. The admin account always
//! pays and proposes; user accounts join as authorizers.
//!
//! The transaction id is written to both the transaction row and the job
//! row strictly before the seal wait begins, so a crashed worker's job can
//! always be correlated on rescue: a re-entering handler finds the id,
//! queries the chain, and completes without resubmitting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::{
    sign_transaction, AccessClient, ChainError, TransactionBuilder, TransactionResult,
};
use crate::jobs::rate_limiter::SendRateLimiter;
use crate::jobs::{JobContext, JobError};
use crate::keys::proposal::{LeaseOutcome, ProposalKeyPool};
use crate::keys::KeyManager;
use crate::models::Address;
use crate::storage::{StoredTransaction, TransactionState, TransfersRepository};

/// How often the seal wait polls the transaction result.
const SEAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One on-chain operation, ready for the pipeline.
pub struct TransactionIntent {
    pub script: String,
    pub arguments: Vec<serde_json::Value>,
    /// Accounts whose keys authorize the transaction, beyond the admin.
    pub authorizers: Vec<Address>,
}

pub struct TransactionService {
    client: Arc<dyn AccessClient>,
    key_manager: Arc<dyn KeyManager>,
    proposal_keys: Arc<ProposalKeyPool>,
    rate_limiter: Arc<SendRateLimiter>,
    transfers: Arc<TransfersRepository>,
    /// Zero disables the seal-wait deadline.
    transaction_timeout: Duration,
}

impl TransactionService {
    pub fn new(
        client: Arc<dyn AccessClient>,
        key_manager: Arc<dyn KeyManager>,
        proposal_keys: Arc<ProposalKeyPool>,
        rate_limiter: Arc<SendRateLimiter>,
        transfers: Arc<TransfersRepository>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            client,
            key_manager,
            proposal_keys,
            rate_limiter,
            transfers,
            transaction_timeout,
        }
    }

    /// Crash-rescue entry: when the job already carries a transaction id,
    /// resolve its fate from the chain instead of resubmitting.
    ///
    /// Returns `None` when there is nothing to resume — either no id, or
    /// the chain never saw the submission (safe to submit fresh).
    pub async fn resume(
        &self,
        ctx: &JobContext,
    ) -> Result<Option<StoredTransaction>, JobError> {
        let Some(transaction_id) = ctx.transaction_id() else {
            return Ok(None);
        };

        info!(
            job_id = %ctx.job_id(),
            transaction_id = %transaction_id,
            "resuming job with submitted transaction"
        );

        match self.client.get_transaction_result(&transaction_id).await {
            Err(ChainError::NotFound(_)) => {
                // Submission never landed; the caller submits fresh.
                Ok(None)
            }
            Err(e) => Err(e.into()),
            Ok(result) => {
                let result = if result.is_sealed() {
                    result
                } else {
                    self.wait_for_seal(&transaction_id, &ctx.cancellation())
                        .await?
                };

                let stored = self.transfers.get_transaction(&transaction_id)?.ok_or_else(|| {
                    JobError::Fatal(format!(
                        "transaction {transaction_id} is on chain but has no stored row"
                    ))
                })?;
                self.record_sealed(stored, result).map(Some)
            }
        }
    }

    /// Run one transaction through the pipeline and return its sealed row.
    pub async fn execute(
        &self,
        ctx: &JobContext,
        intent: TransactionIntent,
    ) -> Result<StoredTransaction, JobError> {
        if let Some(stored) = self.resume(ctx).await? {
            return Ok(stored);
        }

        let cancel = ctx.cancellation();

        // Resolve signers up front; signer failures must not consume a
        // lease or a send permit.
        let admin = self.key_manager.admin_authorizer().await?;
        let mut signers = vec![admin.clone()];
        for address in &intent.authorizers {
            if *address != admin.address {
                signers.push(self.key_manager.user_authorizer(address).await?);
            }
        }

        let reference_block = self.client.get_latest_block().await?;
        let lease = self.proposal_keys.acquire(&cancel).await?;
        if let Err(e) = self.rate_limiter.wait(&cancel).await {
            lease.release(LeaseOutcome::FailedBeforeSubmit);
            return Err(e);
        }

        let mut builder = TransactionBuilder::new(
            intent.script,
            reference_block.id,
            lease.proposal_key_ref(),
            admin.address.clone(),
        );
        for argument in intent.arguments {
            builder = builder.argument(argument);
        }
        for address in &intent.authorizers {
            builder = builder.authorizer(address.clone());
        }

        let signed = match builder.build().and_then(|tx| sign_transaction(tx, &signers)) {
            Ok(signed) => signed,
            Err(e) => {
                lease.release(LeaseOutcome::FailedBeforeSubmit);
                return Err(e.into());
            }
        };
        let script_hash = signed.transaction.script_hash();
        let proposer = lease.address().clone();

        let transaction_id = match self.client.send_transaction(&signed).await {
            Ok(id) => {
                lease.release(LeaseOutcome::SubmittedOk);
                id
            }
            Err(e @ (ChainError::Timeout | ChainError::Transport(_))) => {
                // The node may or may not have taken it; the sequence
                // number has to be re-read before the next use.
                lease.release(LeaseOutcome::SubmittedUnknown);
                return Err(e.into());
            }
            Err(e) => {
                lease.release(LeaseOutcome::FailedBeforeSubmit);
                return Err(e.into());
            }
        };

        info!(
            job_id = %ctx.job_id(),
            transaction_id = %transaction_id,
            "transaction submitted"
        );

        // Persist the id on both rows before waiting for the seal.
        let stored = StoredTransaction {
            transaction_id: transaction_id.clone(),
            job_id: ctx.job_id(),
            payer_address: admin.address.clone(),
            proposer_address: proposer,
            authorizers: intent.authorizers,
            script_hash,
            state: TransactionState::Pending,
            block_height: None,
            events: Vec::new(),
            created_at: Utc::now(),
        };
        self.transfers.upsert_transaction(&stored)?;
        ctx.record_transaction_id(&transaction_id)?;

        let result = self.wait_for_seal(&transaction_id, &cancel).await?;
        self.record_sealed(stored, result)
    }

    async fn wait_for_seal(
        &self,
        transaction_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, JobError> {
        let deadline = if self.transaction_timeout.is_zero() {
            None
        } else {
            Some(tokio::time::Instant::now() + self.transaction_timeout)
        };

        loop {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let result = self.client.get_transaction_result(transaction_id).await?;
            if result.is_sealed() {
                return Ok(result);
            }

            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    warn!(transaction_id = %transaction_id, "seal wait timed out");
                    return Err(JobError::Transient(format!(
                        "transaction {transaction_id} not sealed within timeout"
                    )));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(SEAL_POLL_INTERVAL) => {},
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
            }
        }
    }

    /// Record the sealed result; an execution error is terminal.
    fn record_sealed(
        &self,
        mut stored: StoredTransaction,
        result: TransactionResult,
    ) -> Result<StoredTransaction, JobError> {
        stored.state = if result.sealed_ok() {
            TransactionState::SealedOk
        } else {
            TransactionState::SealedError
        };
        stored.block_height = Some(result.block_height);
        stored.events = result.events;
        self.transfers.upsert_transaction(&stored)?;

        if let Some(error) = result.error {
            return Err(JobError::Fatal(format!("transaction execution failed: {error}")));
        }
        Ok(stored)
    }
}
