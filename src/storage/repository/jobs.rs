// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Job repository.
//!
//! Jobs live in the `jobs` table keyed by uuid, mirrored by a
//! `job_schedule_index` composite-key table
//! (`state|timestamp_be|uuid` → ()) that serves the scheduler's ordered
//! range scans. The timestamp component is `scheduled_at` for every state
//! except `ACCEPTED`, which indexes on `updated_at` so orphan rescue can
//! query by lease age.
//!
//! `update` is optimistic: the caller passes the row as last seen, and the
//! write fails with [`StoreError::StaleWrite`] when the stored `updated_at`
//! has advanced. Jobs are never deleted; terminal rows are retained for
//! audit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use uuid::Uuid;

use super::super::db::{index_timestamp, Store, StoreError, StoreResult, JOBS, JOB_SCHEDULE_INDEX};
use crate::jobs::{Job, JobState};

pub struct JobsRepository {
    store: Arc<Store>,
}

/// Composite index key: `state|timestamp_be|uuid`.
fn make_index_key(state: JobState, at: DateTime<Utc>, id: &Uuid) -> Vec<u8> {
    let tag = state.tag().as_bytes();
    let id = id.to_string();
    let mut key = Vec::with_capacity(tag.len() + 1 + 8 + 1 + id.len());
    key.extend_from_slice(tag);
    key.push(b'|');
    key.extend_from_slice(&index_timestamp(at));
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

/// The timestamp the schedule index orders a job by.
fn index_time(job: &Job) -> DateTime<Utc> {
    match job.state {
        JobState::Accepted => job.updated_at,
        _ => job.scheduled_at,
    }
}

fn make_prefix(state: JobState) -> Vec<u8> {
    let mut prefix = state.tag().as_bytes().to_vec();
    prefix.push(b'|');
    prefix
}

fn make_prefix_end(state: JobState) -> Vec<u8> {
    let mut end = make_prefix(state);
    end.extend_from_slice(&[0xFF; 16]);
    end
}

/// Timestamp component of a composite index key.
fn key_timestamp(key: &[u8], prefix_len: usize) -> Option<u64> {
    let bytes = key.get(prefix_len..prefix_len + 8)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

impl JobsRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist a new job. The row must not exist yet.
    pub fn insert(&self, job: &Job) -> StoreResult<()> {
        let id = job.id.to_string();
        let row = serde_json::to_vec(job)?;

        let write_txn = self.store.db().begin_write()?;
        {
            let mut jobs = write_txn.open_table(JOBS)?;
            if jobs.get(id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!("job {id}")));
            }
            jobs.insert(id.as_str(), row.as_slice())?;

            let mut index = write_txn.open_table(JOB_SCHEDULE_INDEX)?;
            let key = make_index_key(job.state, index_time(job), &job.id);
            index.insert(key.as_slice(), ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Optimistically update a job row.
    ///
    /// The stored `updated_at` must equal `job.updated_at` as last seen by
    /// the caller; otherwise the row has advanced and [`StoreError::StaleWrite`]
    /// is returned. On success the job's `updated_at` is bumped in place.
    pub fn update(&self, job: &mut Job) -> StoreResult<()> {
        let id = job.id.to_string();

        let write_txn = self.store.db().begin_write()?;
        {
            let mut jobs = write_txn.open_table(JOBS)?;

            let stored: Job = {
                let guard = jobs
                    .get(id.as_str())?
                    .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
                serde_json::from_slice(guard.value())?
            };

            if stored.updated_at != job.updated_at {
                return Err(StoreError::StaleWrite);
            }

            let mut index = write_txn.open_table(JOB_SCHEDULE_INDEX)?;
            let old_key = make_index_key(stored.state, index_time(&stored), &stored.id);
            index.remove(old_key.as_slice())?;

            job.updated_at = Utc::now();
            let new_key = make_index_key(job.state, index_time(job), &job.id);
            index.insert(new_key.as_slice(), ())?;

            let row = serde_json::to_vec(job)?;
            jobs.insert(id.as_str(), row.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn find(&self, id: &Uuid) -> StoreResult<Job> {
        let key = id.to_string();
        let read_txn = self.store.db().begin_read()?;
        let jobs = read_txn.open_table(JOBS)?;
        let guard = jobs
            .get(key.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("job {key}")))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    /// Candidate jobs in the given states whose index timestamp is at or
    /// before `before`, ordered by that timestamp ascending across states.
    pub fn list_schedulable(
        &self,
        states: &[JobState],
        before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        let cutoff = u64::from_be_bytes(index_timestamp(before));

        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(JOB_SCHEDULE_INDEX)?;
        let jobs = read_txn.open_table(JOBS)?;

        let mut candidates: Vec<(u64, Job)> = Vec::new();
        for &state in states {
            let prefix = make_prefix(state);
            let prefix_end = make_prefix_end(state);

            for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
                let entry = entry?;
                let key = entry.0.value();

                let Some(ts) = key_timestamp(key, prefix.len()) else {
                    continue;
                };
                // Keys are time-ordered within a state prefix.
                if ts > cutoff {
                    break;
                }

                let id = &key[prefix.len() + 9..];
                let Ok(id) = std::str::from_utf8(id) else {
                    continue;
                };
                if let Some(guard) = jobs.get(id)? {
                    let job: Job = serde_json::from_slice(guard.value())?;
                    candidates.push((ts, job));
                }
                if candidates.len() >= limit * states.len().max(1) {
                    break;
                }
            }
        }

        candidates.sort_by_key(|(ts, _)| *ts);
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(|(_, job)| job).collect())
    }
}
