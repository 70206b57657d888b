// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction building and signing.
//!
//! A transaction is composed from a script, its arguments, a proposal key,
//! a payer, and authorizer accounts. Signers are obtained through the key
//! manager; the envelope signature covers a canonical encoding of the
//! payload so that any mutation invalidates every signature. The wire
//! format is owned by the access node — this module only produces the
//! submittable JSON shape.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::keys::{Authorizer, KeyError};
use crate::models::Address;

/// Domain separator prefixed to the signable payload.
const TRANSACTION_DOMAIN_TAG: &[u8] = b"wallet-api-transaction-v1\0";

/// Proposal key citation carried by a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalKeyRef {
    pub address: Address,
    pub key_index: u32,
    pub sequence_number: u64,
}

/// An unsigned transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub script: String,
    pub arguments: Vec<serde_json::Value>,
    pub reference_block_id: String,
    pub proposal_key: ProposalKeyRef,
    pub payer: Address,
    pub authorizers: Vec<Address>,
}

/// One envelope signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub address: Address,
    pub key_index: u32,
    /// Raw signature bytes, hex.
    pub signature: String,
}

/// A transaction carrying its envelope signatures, ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub envelope_signatures: Vec<TransactionSignature>,
}

/// Errors from the build/sign path.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid transaction script: {0}")]
    InvalidScript(String),

    #[error("signer unavailable: {0}")]
    SignerUnavailable(#[from] KeyError),

    #[error("transaction encoding failed: {0}")]
    EncodingError(String),
}

impl BuildError {
    /// Only transient signer outages are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, BuildError::SignerUnavailable(e) if e.is_transient())
    }
}

impl Transaction {
    /// SHA3-256 digest of the script source, hex.
    pub fn script_hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.script.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Canonical byte encoding covered by every envelope signature.
    pub fn signable_message(&self) -> Result<Vec<u8>, BuildError> {
        let payload =
            serde_json::to_vec(self).map_err(|e| BuildError::EncodingError(e.to_string()))?;
        let mut message = Vec::with_capacity(TRANSACTION_DOMAIN_TAG.len() + payload.len());
        message.extend_from_slice(TRANSACTION_DOMAIN_TAG);
        message.extend_from_slice(&payload);
        Ok(message)
    }
}

/// Builder for a submittable transaction.
pub struct TransactionBuilder {
    script: String,
    arguments: Vec<serde_json::Value>,
    reference_block_id: String,
    proposal_key: ProposalKeyRef,
    payer: Address,
    authorizers: Vec<Address>,
}

impl TransactionBuilder {
    pub fn new(
        script: impl Into<String>,
        reference_block_id: impl Into<String>,
        proposal_key: ProposalKeyRef,
        payer: Address,
    ) -> Self {
        Self {
            script: script.into(),
            arguments: Vec::new(),
            reference_block_id: reference_block_id.into(),
            proposal_key,
            payer,
            authorizers: Vec::new(),
        }
    }

    pub fn argument(mut self, value: serde_json::Value) -> Self {
        self.arguments.push(value);
        self
    }

    pub fn authorizer(mut self, address: Address) -> Self {
        if !self.authorizers.contains(&address) {
            self.authorizers.push(address);
        }
        self
    }

    /// Assemble the unsigned transaction.
    pub fn build(self) -> Result<Transaction, BuildError> {
        if self.script.trim().is_empty() {
            return Err(BuildError::InvalidScript("empty script".into()));
        }
        Ok(Transaction {
            script: self.script,
            arguments: self.arguments,
            reference_block_id: self.reference_block_id,
            proposal_key: self.proposal_key,
            payer: self.payer,
            authorizers: self.authorizers,
        })
    }
}

/// Sign `transaction` with every signer, producing the submittable form.
///
/// Signers are deduplicated on `(address, key_index)` so the admin account
/// signs once even when it both pays and authorizes.
pub fn sign_transaction(
    transaction: Transaction,
    signers: &[Authorizer],
) -> Result<SignedTransaction, BuildError> {
    let message = transaction.signable_message()?;

    let mut envelope_signatures: Vec<TransactionSignature> = Vec::with_capacity(signers.len());
    for authorizer in signers {
        let duplicate = envelope_signatures
            .iter()
            .any(|s| s.address == authorizer.address && s.key_index == authorizer.key_index);
        if duplicate {
            continue;
        }
        let signature = authorizer.signer.sign(&message)?;
        envelope_signatures.push(TransactionSignature {
            address: authorizer.address.clone(),
            key_index: authorizer.key_index,
            signature: hex::encode(signature),
        });
    }

    Ok(SignedTransaction {
        transaction,
        envelope_signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::local::LocalSigner;
    use crate::chain::types::{HashAlgorithm, SignatureAlgorithm};
    use std::sync::Arc;

    fn sample_proposal_key() -> ProposalKeyRef {
        ProposalKeyRef {
            address: "0xf8d6e0586b0a20c7".parse().unwrap(),
            key_index: 0,
            sequence_number: 42,
        }
    }

    fn sample_transaction() -> Transaction {
        TransactionBuilder::new(
            "transaction { execute {} }",
            "block-1",
            sample_proposal_key(),
            "0xf8d6e0586b0a20c7".parse().unwrap(),
        )
        .argument(serde_json::json!("1.5"))
        .authorizer("0x0ae53cb6e3f42a79".parse().unwrap())
        .build()
        .unwrap()
    }

    #[test]
    fn empty_script_is_rejected() {
        let result = TransactionBuilder::new(
            "   ",
            "block-1",
            sample_proposal_key(),
            "0xf8d6e0586b0a20c7".parse().unwrap(),
        )
        .build();
        assert!(matches!(result, Err(BuildError::InvalidScript(_))));
    }

    #[test]
    fn duplicate_authorizers_collapse() {
        let addr: Address = "0x0ae53cb6e3f42a79".parse().unwrap();
        let tx = TransactionBuilder::new(
            "transaction { execute {} }",
            "block-1",
            sample_proposal_key(),
            "0xf8d6e0586b0a20c7".parse().unwrap(),
        )
        .authorizer(addr.clone())
        .authorizer(addr)
        .build()
        .unwrap();
        assert_eq!(tx.authorizers.len(), 1);
    }

    #[test]
    fn signable_message_changes_with_sequence_number() {
        let a = sample_transaction();
        let mut b = sample_transaction();
        b.proposal_key.sequence_number += 1;
        assert_ne!(a.signable_message().unwrap(), b.signable_message().unwrap());
    }

    #[test]
    fn script_hash_is_stable_hex() {
        let tx = sample_transaction();
        let hash = tx.script_hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sample_transaction().script_hash());
    }

    #[test]
    fn signing_dedups_payer_and_authorizer() {
        let key = LocalSigner::generate(SignatureAlgorithm::EcdsaP256, HashAlgorithm::Sha3_256);
        let address: Address = "0xf8d6e0586b0a20c7".parse().unwrap();
        let authorizer = Authorizer {
            address: address.clone(),
            key_index: 0,
            signer: Arc::new(key),
        };

        let signed =
            sign_transaction(sample_transaction(), &[authorizer.clone(), authorizer]).unwrap();
        assert_eq!(signed.envelope_signatures.len(), 1);
        assert!(!signed.envelope_signatures[0].signature.is_empty());
    }
}
