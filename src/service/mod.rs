// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain operations shared by the REST handlers and the job handlers.
//!
//! Every on-chain operation exists once, written against a [`JobContext`];
//! the async path runs it through the worker pool, the `use-sync` path runs
//! it inline with [`execute_inline`]. Both leave the same audit trail: a
//! job row plus the transaction it produced.

pub mod accounts;
pub mod tokens;
pub mod transactions;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::jobs::{Job, JobContext, JobError, JobState};
use crate::storage::JobsRepository;

/// Run one job synchronously: persist it, lease it, execute the operation,
/// and record the terminal state. Returns the completed job.
pub(crate) async fn execute_inline<F, Fut>(
    jobs: &Arc<JobsRepository>,
    job: Job,
    cancel: CancellationToken,
    op: F,
) -> Result<Job, JobError>
where
    F: FnOnce(Arc<JobContext>) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, JobError>>,
{
    // Inserted already leased, so the poller never races an inline run.
    let mut job = job;
    job.state = JobState::Accepted;
    jobs.insert(&job)?;

    let ctx = Arc::new(JobContext::new(job, jobs.clone(), cancel));
    let outcome = op(ctx.clone()).await;

    let ctx =
        Arc::try_unwrap(ctx).map_err(|_| JobError::Fatal("job context still borrowed".into()))?;
    let mut job = ctx.into_job();

    match outcome {
        Ok(value) => {
            job.state = JobState::Complete;
            job.result = Some(value);
            job.error = None;
            jobs.update(&mut job)?;
            Ok(job)
        }
        Err(e) => {
            job.state = JobState::Failed;
            job.error = Some(e.to_string());
            if let Err(persist) = jobs.update(&mut job) {
                tracing::error!(job_id = %job.id, error = %persist, "failed to record sync job failure");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    fn jobs() -> (Arc<JobsRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("test.redb"), None).unwrap());
        (Arc::new(JobsRepository::new(store)), dir)
    }

    #[tokio::test]
    async fn inline_success_completes_the_job() {
        let (jobs, _dir) = jobs();
        let job = Job::new("token_setup", serde_json::json!({}));
        let id = job.id;

        let done = execute_inline(&jobs, job, CancellationToken::new(), |_ctx| async {
            Ok(serde_json::json!({"transaction_id": "aa11"}))
        })
        .await
        .unwrap();

        assert_eq!(done.state, JobState::Complete);
        assert_eq!(jobs.find(&id).unwrap().state, JobState::Complete);
    }

    #[tokio::test]
    async fn inline_failure_records_failed_state() {
        let (jobs, _dir) = jobs();
        let job = Job::new("token_setup", serde_json::json!({}));
        let id = job.id;

        let result = execute_inline(&jobs, job, CancellationToken::new(), |_ctx| async {
            Err(JobError::Validation("bad recipient".into()))
        })
        .await;

        assert!(result.is_err());
        let stored = jobs.find(&id).unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.error.as_deref(), Some("bad recipient"));
    }
}
