// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Job Scheduler
//!
//! Feeds the bounded runnable queue from two sources: direct enqueues from
//! the API and a periodic database poll that rescues re-schedulable jobs
//! (`INIT`/`NO_AVAILABLE_WORKERS`/`ERROR` past their `scheduled_at`) and
//! orphaned leases (`ACCEPTED` rows whose `updated_at` is older than the
//! accepted grace period — the worker that held them is assumed dead).
//!
//! A process-local in-flight set de-duplicates: a poll never re-dispatches
//! a job a worker is still holding. Pushes are non-blocking; when the
//! queue fills mid-poll the cycle stops and the remainder waits for the
//! next tick (backpressure).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Job, JobState};
use crate::storage::{JobsRepository, StoreError, StoreResult};

/// Max jobs fetched per state group per poll cycle.
const POLL_BATCH: usize = 500;

/// Process-local set of job ids currently queued or held by a worker.
#[derive(Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id; `false` when it is already in flight.
    pub fn reserve(&self, id: Uuid) -> bool {
        self.inner.lock().unwrap().insert(id)
    }

    pub fn release(&self, id: &Uuid) {
        self.inner.lock().unwrap().remove(id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

pub struct Scheduler {
    queue: mpsc::Sender<Uuid>,
    in_flight: InFlightSet,
    jobs: Arc<JobsRepository>,
    poll_interval: Duration,
    accepted_grace_period: Duration,
    reschedulable_grace_period: Duration,
}

impl Scheduler {
    /// Create the scheduler and the receiving end of the runnable queue.
    pub fn new(
        queue_capacity: usize,
        jobs: Arc<JobsRepository>,
        in_flight: InFlightSet,
        poll_interval: Duration,
        accepted_grace_period: Duration,
        reschedulable_grace_period: Duration,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                queue,
                in_flight,
                jobs,
                poll_interval,
                accepted_grace_period,
                reschedulable_grace_period,
            },
            receiver,
        )
    }

    /// Non-blocking enqueue of a freshly persisted job.
    ///
    /// When the queue is full the job is parked as `NO_AVAILABLE_WORKERS`
    /// with its next attempt after the re-schedulable grace period; the
    /// updated row is left in `job` for the caller to return.
    pub fn enqueue(&self, job: &mut Job) -> StoreResult<()> {
        if !self.in_flight.reserve(job.id) {
            return Ok(());
        }

        match self.queue.try_send(job.id) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.in_flight.release(&job.id);
                job.state = JobState::NoAvailableWorkers;
                job.scheduled_at = Utc::now()
                    + chrono::Duration::from_std(self.reschedulable_grace_period)
                        .unwrap_or_else(|_| chrono::Duration::seconds(600));
                self.jobs.update(job)?;
                info!(job_id = %job.id, "runnable queue full, job parked");
                Ok(())
            }
        }
    }

    /// Run the poll loop until cancelled. Polling stops before the worker
    /// pool is signalled, so shutdown never races fresh dispatches.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "job scheduler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("job scheduler shutting down");
                return;
            }

            if let Err(e) = self.poll_step() {
                warn!(error = %e, "scheduler poll failed, will retry");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("job scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One poll cycle: collect candidates, push until the queue fills.
    fn poll_step(&self) -> Result<(), StoreError> {
        let now = Utc::now();

        let mut candidates = self.jobs.list_schedulable(
            &[JobState::Init, JobState::NoAvailableWorkers, JobState::Error],
            now,
            POLL_BATCH,
        )?;

        let accepted_cutoff = now
            - chrono::Duration::from_std(self.accepted_grace_period)
                .unwrap_or_else(|_| chrono::Duration::seconds(180));
        candidates.extend(self.jobs.list_schedulable(
            &[JobState::Accepted],
            accepted_cutoff,
            POLL_BATCH,
        )?);

        let mut dispatched = 0usize;
        for job in candidates {
            if job.state.is_terminal() {
                continue;
            }
            if !self.in_flight.reserve(job.id) {
                continue;
            }
            if self.queue.try_send(job.id).is_err() {
                // Queue full: stop this cycle, the rest keeps its schedule.
                self.in_flight.release(&job.id);
                break;
            }
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::debug!(count = dispatched, "scheduler dispatched jobs");
        }
        Ok(())
    }
}
