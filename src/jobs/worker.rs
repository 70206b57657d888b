// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Worker Pool
//!
//! `WORKER_COUNT` long-lived executors consume the runnable queue. Each
//! worker leases one job at a time: it transitions the row to `ACCEPTED`
//! through an optimistic update (losing that race means another worker
//! holds the job, and the id is dropped silently), resolves the handler,
//! and records the terminal outcome.
//!
//! Retriable failures bump `error_count` and reschedule after the grace
//! period until `MAX_JOB_ERROR_COUNT` is exhausted; validation and fatal
//! failures go straight to `FAILED`. Cancellation leaves the row leased —
//! the accepted-grace rescue picks it up after restart, and handlers are
//! idempotent on re-entry (they re-query the chain when the job already
//! carries a transaction id).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::scheduler::InFlightSet;
use super::webhook::WebhookSink;
use super::{HandlerRegistry, Job, JobContext, JobError, JobState};
use crate::events::HaltSignal;
use crate::storage::{JobsRepository, StoreError};

pub struct WorkerPool {
    worker_count: usize,
    registry: Arc<HandlerRegistry>,
    jobs: Arc<JobsRepository>,
    webhook: Arc<WebhookSink>,
    in_flight: InFlightSet,
    halt: Arc<HaltSignal>,
    max_job_error_count: u32,
    reschedulable_grace_period: Duration,
    pause_duration: Duration,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_count: usize,
        registry: Arc<HandlerRegistry>,
        jobs: Arc<JobsRepository>,
        webhook: Arc<WebhookSink>,
        in_flight: InFlightSet,
        halt: Arc<HaltSignal>,
        max_job_error_count: u32,
        reschedulable_grace_period: Duration,
        pause_duration: Duration,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            registry,
            jobs,
            webhook,
            in_flight,
            halt,
            max_job_error_count,
            reschedulable_grace_period,
            pause_duration,
        }
    }

    /// Spawn the worker tasks over the shared runnable queue.
    pub fn start(
        self: Arc<Self>,
        receiver: mpsc::Receiver<Uuid>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        info!(workers = self.worker_count, "worker pool starting");

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        (0..self.worker_count)
            .map(|worker| {
                let pool = self.clone();
                let receiver = receiver.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, receiver, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(
        &self,
        worker: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let job_id = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    maybe = receiver.recv() => match maybe {
                        Some(id) => id,
                        None => {
                            debug!(worker, "runnable queue closed");
                            return;
                        }
                    },
                    _ = shutdown.cancelled() => {
                        debug!(worker, "worker shutting down");
                        return;
                    }
                }
            };

            self.process(job_id, &shutdown).await;
            self.in_flight.release(&job_id);

            if shutdown.is_cancelled() {
                debug!(worker, "worker shutting down");
                return;
            }
        }
    }

    /// Drive one job from lease to terminal (or rescheduled) state.
    async fn process(&self, job_id: Uuid, shutdown: &CancellationToken) {
        let mut job = match self.jobs.find(&job_id) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "queued job not found");
                return;
            }
        };

        if job.state.is_terminal() {
            return;
        }

        // Lease the row. Losing the optimistic write means another worker
        // already holds this job.
        job.state = JobState::Accepted;
        match self.jobs.update(&mut job) {
            Ok(()) => {}
            Err(StoreError::StaleWrite) => {
                debug!(job_id = %job_id, "job already leased elsewhere");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to lease job");
                return;
            }
        }

        // While the chain listener reports the access node down, sleep
        // instead of burning retries.
        while self.halt.is_halted() {
            tokio::select! {
                _ = tokio::time::sleep(self.pause_duration) => {},
                _ = shutdown.cancelled() => return,
            }
        }

        let Some(handler) = self.registry.resolve(&job.job_type) else {
            job.state = JobState::Failed;
            job.error = Some(format!("unknown job type: {}", job.job_type));
            self.finish(job).await;
            return;
        };

        let context = JobContext::new(job, self.jobs.clone(), shutdown.child_token());
        let outcome = handler.execute(&context).await;
        let mut job = context.into_job();

        match outcome {
            Ok(result) => {
                job.state = JobState::Complete;
                job.result = Some(result);
                job.error = None;
                info!(job_id = %job.id, job_type = %job.job_type, "job complete");
                self.finish(job).await;
            }
            Err(JobError::Cancelled) => {
                // Leave the lease in place; the accepted-grace rescue will
                // re-dispatch after restart.
                info!(job_id = %job.id, "job interrupted by shutdown");
            }
            Err(e) if e.is_retriable() => {
                job.error_count += 1;
                job.error = Some(e.to_string());
                if job.error_count < self.max_job_error_count {
                    job.state = JobState::Error;
                    job.scheduled_at = Utc::now()
                        + chrono::Duration::from_std(self.reschedulable_grace_period)
                            .unwrap_or_else(|_| chrono::Duration::seconds(600));
                    warn!(
                        job_id = %job.id,
                        error_count = job.error_count,
                        error = %e,
                        "job failed, rescheduled"
                    );
                } else {
                    job.state = JobState::Failed;
                    error!(
                        job_id = %job.id,
                        error_count = job.error_count,
                        error = %e,
                        "job retries exhausted"
                    );
                }
                self.finish(job).await;
            }
            Err(e) => {
                job.state = JobState::Failed;
                job.error = Some(e.to_string());
                error!(job_id = %job.id, error = %e, "job failed terminally");
                self.finish(job).await;
            }
        }
    }

    /// Persist the post-handler state and notify the webhook on terminal
    /// transitions.
    async fn finish(&self, mut job: Job) {
        match self.jobs.update(&mut job) {
            Ok(()) => {
                if job.state.is_terminal() {
                    self.webhook.notify(&job).await;
                }
            }
            Err(StoreError::StaleWrite) => {
                // The current holder proceeds; our outcome is discarded.
                debug!(job_id = %job.id, "dropping stale job outcome");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to persist job outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobHandler;
    use crate::storage::Store;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn execute(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
            Ok(ctx.attributes())
        }
    }

    struct FailTimes {
        failures: AtomicU32,
        budget: u32,
    }

    #[async_trait]
    impl JobHandler for FailTimes {
        async fn execute(&self, _ctx: &JobContext) -> Result<serde_json::Value, JobError> {
            if self.failures.fetch_add(1, Ordering::SeqCst) < self.budget {
                Err(JobError::Transient("access node timeout".into()))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    fn pool_with(
        registry: HandlerRegistry,
        max_errors: u32,
    ) -> (
        Arc<WorkerPool>,
        mpsc::Sender<Uuid>,
        Arc<JobsRepository>,
        CancellationToken,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("test.redb"), None).unwrap());
        let jobs = Arc::new(JobsRepository::new(store));

        let pool = Arc::new(WorkerPool::new(
            2,
            Arc::new(registry),
            jobs.clone(),
            Arc::new(WebhookSink::new(None, Duration::from_secs(1))),
            InFlightSet::new(),
            Arc::new(HaltSignal::new()),
            max_errors,
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));

        let (sender, receiver) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        pool.clone().start(receiver, shutdown.clone());
        (pool, sender, jobs, shutdown, dir)
    }

    async fn wait_for_state(repo: &JobsRepository, id: &Uuid, state: JobState) -> Job {
        for _ in 0..200 {
            let job = repo.find(id).unwrap();
            if job.state == state {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {state:?}");
    }

    #[tokio::test]
    async fn job_runs_to_complete() {
        let registry = HandlerRegistry::new().register("echo", Arc::new(Echo));
        let (_pool, sender, jobs, shutdown, _dir) = pool_with(registry, 10);

        let job = Job::new("echo", serde_json::json!({"hello": "world"}));
        jobs.insert(&job).unwrap();
        sender.send(job.id).await.unwrap();

        let done = wait_for_state(&jobs, &job.id, JobState::Complete).await;
        assert_eq!(done.result, Some(serde_json::json!({"hello": "world"})));
        assert_eq!(done.error_count, 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn unknown_job_type_fails_terminally() {
        let registry = HandlerRegistry::new();
        let (_pool, sender, jobs, shutdown, _dir) = pool_with(registry, 10);

        let job = Job::new("who_knows", serde_json::json!({}));
        jobs.insert(&job).unwrap();
        sender.send(job.id).await.unwrap();

        let done = wait_for_state(&jobs, &job.id, JobState::Failed).await;
        assert!(done.error.unwrap().contains("unknown job type"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn transient_failures_reschedule_then_complete() {
        let registry = HandlerRegistry::new().register(
            "flaky",
            Arc::new(FailTimes {
                failures: AtomicU32::new(0),
                budget: 2,
            }),
        );
        let (_pool, sender, jobs, shutdown, _dir) = pool_with(registry, 10);

        let job = Job::new("flaky", serde_json::json!({}));
        jobs.insert(&job).unwrap();

        sender.send(job.id).await.unwrap();
        let errored = wait_for_state(&jobs, &job.id, JobState::Error).await;
        assert_eq!(errored.error_count, 1);
        assert!(errored.scheduled_at > Utc::now());

        // Re-dispatch twice more (the scheduler's poll would do this).
        sender.send(job.id).await.unwrap();
        let errored = wait_for_state(&jobs, &job.id, JobState::Error).await;
        assert_eq!(errored.error_count, 2);

        sender.send(job.id).await.unwrap();
        let done = wait_for_state(&jobs, &job.id, JobState::Complete).await;
        assert_eq!(done.error_count, 2, "error count survives success");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn retries_exhaust_into_failed() {
        let registry = HandlerRegistry::new().register(
            "doomed",
            Arc::new(FailTimes {
                failures: AtomicU32::new(0),
                budget: u32::MAX,
            }),
        );
        let (_pool, sender, jobs, shutdown, _dir) = pool_with(registry, 2);

        let job = Job::new("doomed", serde_json::json!({}));
        jobs.insert(&job).unwrap();

        sender.send(job.id).await.unwrap();
        wait_for_state(&jobs, &job.id, JobState::Error).await;

        sender.send(job.id).await.unwrap();
        let done = wait_for_state(&jobs, &job.id, JobState::Failed).await;
        assert_eq!(done.error_count, 2);

        // Terminal states are sticky: re-sending the id is a no-op.
        sender.send(job.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(jobs.find(&job.id).unwrap().state, JobState::Failed);
        shutdown.cancel();
    }
}
