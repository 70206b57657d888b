// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Proposal-key lease pool.
//!
//! The admin account proposes most transactions, and a proposal key's
//! sequence number must never be cited by two in-flight transactions. To
//! author transactions in parallel the admin account carries several
//! proposal keys; this pool hands out at most one lease per key index and
//! tracks the expected sequence number across submissions.
//!
//! Leases are process-local only. A restart invalidates everything and the
//! pool reseeds sequence numbers from chain account introspection.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chain::{AccessClient, ChainError, ProposalKeyRef};
use crate::models::Address;

/// How a lease holder finished with its proposal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The transaction was accepted by the access node: the sequence
    /// number was consumed.
    SubmittedOk,
    /// Nothing reached the chain: the sequence number is still valid.
    FailedBeforeSubmit,
    /// Submission was attempted but its fate is unknown: the sequence
    /// number must be re-read from the chain before the next use.
    SubmittedUnknown,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("proposal key acquisition cancelled")]
    Cancelled,

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("admin account has {have} usable proposal keys, {want} configured")]
    InsufficientKeys { have: usize, want: usize },
}

struct Slot {
    key_index: u32,
    sequence_number: u64,
    /// Sequence unknown; reload from chain before handing out.
    dirty: bool,
    leased: bool,
}

struct PoolInner {
    address: Address,
    client: Arc<dyn AccessClient>,
    semaphore: Arc<Semaphore>,
    slots: Mutex<Vec<Slot>>,
}

/// FIFO pool of proposal-key leases on one account.
pub struct ProposalKeyPool {
    inner: Arc<PoolInner>,
}

impl ProposalKeyPool {
    /// Seed the pool from chain account introspection, claiming the first
    /// `count` unrevoked key indices.
    pub async fn from_chain(
        client: Arc<dyn AccessClient>,
        address: Address,
        count: usize,
    ) -> Result<Self, LeaseError> {
        let account = client.get_account(&address).await?;

        let mut usable: Vec<&crate::chain::AccountKey> =
            account.keys.iter().filter(|k| !k.revoked).collect();
        usable.sort_by_key(|k| k.index);

        if usable.len() < count {
            return Err(LeaseError::InsufficientKeys {
                have: usable.len(),
                want: count,
            });
        }

        let slots = usable
            .into_iter()
            .take(count)
            .map(|key| Slot {
                key_index: key.index,
                sequence_number: key.sequence_number,
                dirty: false,
                leased: false,
            })
            .collect();

        Ok(Self {
            inner: Arc::new(PoolInner {
                address,
                client,
                semaphore: Arc::new(Semaphore::new(count)),
                slots: Mutex::new(slots),
            }),
        })
    }

    /// Block until a key index is free, FIFO-fair. Honours cancellation.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProposalKeyLease, LeaseError> {
        let permit = tokio::select! {
            permit = self.inner.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| LeaseError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(LeaseError::Cancelled),
        };

        // The permit guarantees a free slot exists.
        let (slot_index, key_index, sequence_number, dirty) = {
            let mut slots = self.inner.slots.lock().unwrap();
            let (slot_index, slot) = slots
                .iter_mut()
                .enumerate()
                .find(|(_, s)| !s.leased)
                .expect("semaphore permit without a free proposal key slot");
            slot.leased = true;
            (slot_index, slot.key_index, slot.sequence_number, slot.dirty)
        };

        let sequence_number = if dirty {
            match self.refresh_sequence(key_index).await {
                Ok(sequence) => {
                    let mut slots = self.inner.slots.lock().unwrap();
                    slots[slot_index].sequence_number = sequence;
                    slots[slot_index].dirty = false;
                    sequence
                }
                Err(e) => {
                    let mut slots = self.inner.slots.lock().unwrap();
                    slots[slot_index].leased = false;
                    drop(slots);
                    drop(permit);
                    return Err(LeaseError::Chain(e));
                }
            }
        } else {
            sequence_number
        };

        Ok(ProposalKeyLease {
            pool: self.inner.clone(),
            slot: slot_index,
            key_index,
            sequence_number,
            permit: Some(permit),
            released: false,
        })
    }

    async fn refresh_sequence(&self, key_index: u32) -> Result<u64, ChainError> {
        let account = self.inner.client.get_account(&self.inner.address).await?;
        account
            .keys
            .iter()
            .find(|k| k.index == key_index)
            .map(|k| k.sequence_number)
            .ok_or_else(|| {
                ChainError::InvalidResponse(format!(
                    "proposal key index {key_index} missing from account"
                ))
            })
    }

    #[cfg(test)]
    fn sequence_of(&self, key_index: u32) -> Option<u64> {
        let slots = self.inner.slots.lock().unwrap();
        slots
            .iter()
            .find(|s| s.key_index == key_index)
            .map(|s| s.sequence_number)
    }
}

/// An exclusive claim on one `(account, key_index)` pair.
///
/// Dropping an unreleased lease is equivalent to
/// [`LeaseOutcome::FailedBeforeSubmit`].
pub struct ProposalKeyLease {
    pool: Arc<PoolInner>,
    slot: usize,
    pub key_index: u32,
    pub sequence_number: u64,
    permit: Option<OwnedSemaphorePermit>,
    released: bool,
}

impl ProposalKeyLease {
    pub fn address(&self) -> &Address {
        &self.pool.address
    }

    /// The proposal-key citation to embed into a transaction.
    pub fn proposal_key_ref(&self) -> ProposalKeyRef {
        ProposalKeyRef {
            address: self.pool.address.clone(),
            key_index: self.key_index,
            sequence_number: self.sequence_number,
        }
    }

    /// Return the lease, recording what happened to the sequence number.
    pub fn release(mut self, outcome: LeaseOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: LeaseOutcome) {
        if self.released {
            return;
        }
        self.released = true;

        {
            let mut slots = self.pool.slots.lock().unwrap();
            let slot = &mut slots[self.slot];
            match outcome {
                LeaseOutcome::SubmittedOk => slot.sequence_number += 1,
                LeaseOutcome::FailedBeforeSubmit => {}
                LeaseOutcome::SubmittedUnknown => slot.dirty = true,
            }
            slot.leased = false;
        }

        // Releasing the permit wakes the next FIFO waiter.
        self.permit.take();
    }
}

impl Drop for ProposalKeyLease {
    fn drop(&mut self) {
        self.finish(LeaseOutcome::FailedBeforeSubmit);
    }
}
