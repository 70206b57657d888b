// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Job status webhook sink.
//!
//! When `JOB_STATUS_WEBHOOK` is configured, every terminal job transition
//! is POSTed there as JSON. Delivery is attempted once, bounded by
//! `JOB_STATUS_WEBHOOK_TIMEOUT`; failures are logged and never affect job
//! state. Clients that need reliability poll `GET /jobs/{id}`.

use std::time::Duration;

use tracing::warn;

use super::Job;

pub struct WebhookSink {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        Self {
            endpoint,
            client: builder.build().unwrap_or_default(),
        }
    }

    /// Fire-and-forget notification of a terminal job state.
    pub async fn notify(&self, job: &Job) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let result = self.client.post(endpoint).json(job).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(job_id = %job.id, state = ?job.state, "job webhook delivered");
            }
            Ok(response) => {
                warn!(
                    job_id = %job.id,
                    status = %response.status(),
                    "job webhook rejected"
                );
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_without_endpoint_is_a_no_op() {
        let sink = WebhookSink::new(None, Duration::from_secs(1));
        let job = Job::new("create_account", serde_json::json!({}));
        // Must return without attempting any I/O.
        sink.notify(&job).await;
    }

    #[tokio::test]
    async fn notify_failure_does_not_propagate() {
        // Nothing listens here; delivery fails fast and is swallowed.
        let sink = WebhookSink::new(
            Some("http://127.0.0.1:9/unreachable".to_string()),
            Duration::from_millis(200),
        );
        let job = Job::new("create_account", serde_json::json!({}));
        sink.notify(&job).await;
    }
}
