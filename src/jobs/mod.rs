// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Asynchronous Jobs
//!
//! A [`Job`] is the durable record of one unit of asynchronous work: an
//! on-chain operation requested over the API and executed by a worker. Jobs
//! move through a small state machine, retriable failures reschedule them,
//! and terminal states stick.
//!
//! The submodules hold the moving parts: [`scheduler`] feeds the runnable
//! queue, [`worker`] drives handlers, [`rate_limiter`] caps chain
//! submissions, [`webhook`] reports terminal states.

pub mod rate_limiter;
pub mod scheduler;
pub mod webhook;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::chain::{BuildError, ChainError};
use crate::keys::proposal::LeaseError;
use crate::keys::KeyError;
use crate::storage::{JobsRepository, StoreError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum JobState {
    /// Persisted, not yet picked up.
    #[serde(rename = "INIT")]
    Init,
    /// Leased by a worker.
    #[serde(rename = "ACCEPTED")]
    Accepted,
    /// The runnable queue was full at enqueue time.
    #[serde(rename = "NO_AVAILABLE_WORKERS")]
    NoAvailableWorkers,
    /// Handler failed, retriable.
    #[serde(rename = "ERROR")]
    Error,
    /// Terminal success.
    #[serde(rename = "COMPLETE")]
    Complete,
    /// Terminal failure.
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }

    /// Stable tag used in the schedule index key.
    pub(crate) fn tag(self) -> &'static str {
        match self {
            JobState::Init => "INIT",
            JobState::Accepted => "ACCEPTED",
            JobState::NoAvailableWorkers => "NO_AVAILABLE_WORKERS",
            JobState::Error => "ERROR",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
        }
    }
}

/// Durable record of one asynchronous unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: Uuid,
    /// Key into the handler registry.
    #[serde(rename = "type")]
    pub job_type: String,
    pub state: JobState,
    /// Chain transaction hash, set as soon as submission returns.
    pub transaction_id: Option<String>,
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    /// Last error message.
    pub error: Option<String>,
    pub error_count: u32,
    /// Opaque handler input, persisted as-is.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be picked up.
    pub scheduled_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, attributes: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            state: JobState::Init,
            transaction_id: None,
            result: None,
            error: None,
            error_count: 0,
            attributes,
            created_at: now,
            updated_at: now,
            scheduled_at: now,
        }
    }
}

/// Handler failure classification; the worker owns the resulting state
/// transition.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Malformed input. Terminal, surfaces as 4xx on sync requests.
    #[error("{0}")]
    Validation(String),

    /// A referenced entity does not exist. Terminal.
    #[error("{0}")]
    NotFound(String),

    /// Transient I/O failure; the job is rescheduled.
    #[error("{0}")]
    Transient(String),

    /// Cancelled by shutdown; the job stays leased and is rescued later.
    #[error("cancelled")]
    Cancelled,

    /// Non-recoverable failure. Terminal.
    #[error("{0}")]
    Fatal(String),
}

impl JobError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<ChainError> for JobError {
    fn from(err: ChainError) -> Self {
        if err.is_retriable() {
            JobError::Transient(err.to_string())
        } else {
            match err {
                ChainError::NotFound(what) => JobError::NotFound(what),
                other => JobError::Fatal(other.to_string()),
            }
        }
    }
}

impl From<BuildError> for JobError {
    fn from(err: BuildError) -> Self {
        if err.is_retriable() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Fatal(err.to_string())
        }
    }
}

impl From<KeyError> for JobError {
    fn from(err: KeyError) -> Self {
        if err.is_transient() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Fatal(err.to_string())
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => JobError::NotFound(what),
            // DB contention and I/O are worth retrying.
            other => JobError::Transient(other.to_string()),
        }
    }
}

impl From<LeaseError> for JobError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Cancelled => JobError::Cancelled,
            LeaseError::Chain(chain) => chain.into(),
            other @ LeaseError::InsufficientKeys { .. } => JobError::Fatal(other.to_string()),
        }
    }
}

/// Execution context handed to a job handler.
///
/// Holds the leased job row so the handler can publish the transaction id
/// mid-flight: the id is persisted before the seal wait begins, which is
/// what makes crash rescue able to correlate.
pub struct JobContext {
    job: Mutex<Job>,
    repo: Arc<JobsRepository>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job: Job, repo: Arc<JobsRepository>, cancel: CancellationToken) -> Self {
        Self {
            job: Mutex::new(job),
            repo,
            cancel,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.lock().unwrap().id
    }

    pub fn attributes(&self) -> serde_json::Value {
        self.job.lock().unwrap().attributes.clone()
    }

    /// Non-null when this is a rescue re-entry after a crash.
    pub fn transaction_id(&self) -> Option<String> {
        self.job.lock().unwrap().transaction_id.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Persist the submitted transaction id on the job row immediately.
    pub fn record_transaction_id(&self, transaction_id: &str) -> Result<(), JobError> {
        let mut job = self.job.lock().unwrap();
        job.transaction_id = Some(transaction_id.to_string());
        self.repo.update(&mut job)?;
        Ok(())
    }

    /// Take the job back after handler execution.
    pub fn into_job(self) -> Job {
        self.job.into_inner().unwrap()
    }
}

/// A registered job executor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError>;
}

/// Immutable mapping from job type name to handler, keyed at startup.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_flagged() {
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Init.is_terminal());
        assert!(!JobState::Error.is_terminal());
    }

    #[test]
    fn job_states_serialize_screaming_snake() {
        let job = Job::new("create_account", serde_json::json!({}));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "INIT");
        assert_eq!(json["type"], "create_account");
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = Job::new("create_account", serde_json::json!({"recipient": "0x01"}));
        let bytes = serde_json::to_vec(&job).unwrap();
        let restored: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.id, job.id);
        assert_eq!(restored.attributes, job.attributes);
        assert_eq!(restored.updated_at, job.updated_at);
    }

    #[test]
    fn error_classification() {
        assert!(JobError::Transient("timeout".into()).is_retriable());
        assert!(!JobError::Validation("bad".into()).is_retriable());
        assert!(!JobError::Fatal("corrupt".into()).is_retriable());

        let from_chain: JobError = ChainError::Timeout.into();
        assert!(from_chain.is_retriable());

        let from_chain: JobError = ChainError::Rejected("bad signature".into()).into();
        assert!(!from_chain.is_retriable());
    }

    #[test]
    fn registry_resolves_registered_types_only() {
        struct Nop;
        #[async_trait]
        impl JobHandler for Nop {
            async fn execute(&self, _ctx: &JobContext) -> Result<serde_json::Value, JobError> {
                Ok(serde_json::Value::Null)
            }
        }

        let registry = HandlerRegistry::new().register("create_account", Arc::new(Nop));
        assert!(registry.resolve("create_account").is_some());
        assert!(registry.resolve("unknown").is_none());
    }
}
