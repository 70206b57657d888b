// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction send-rate limiter.
//!
//! A token bucket shared by every worker: each chain submission consumes
//! one permit, refill and burst both equal `MAX_TPS`. Waiting honours
//! cancellation so shutdown never parks on the bucket.

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use super::JobError;

pub struct SendRateLimiter {
    inner: DefaultDirectRateLimiter,
}

impl SendRateLimiter {
    /// Limiter allowing `max_tps` submissions per second. Zero is clamped
    /// to one.
    pub fn new(max_tps: u32) -> Self {
        let per_second = NonZeroU32::new(max_tps).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// Suspend until a send permit is available.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        tokio::select! {
            _ = self.inner.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(JobError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn first_permit_is_immediate() {
        let limiter = SendRateLimiter::new(10);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhausted_bucket_delays_the_next_permit() {
        let limiter = SendRateLimiter::new(10);
        let cancel = CancellationToken::new();

        // Drain the burst capacity.
        for _ in 0..10 {
            limiter.wait(&cancel).await.unwrap();
        }

        // The 11th permit needs a refill tick (~100ms at 10 TPS).
        let started = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_respects_cancellation() {
        let limiter = SendRateLimiter::new(1);
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        cancel.cancel();
        let result = limiter.wait(&cancel).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
    }

    #[test]
    fn zero_tps_is_clamped() {
        // Construction must not panic.
        let _limiter = SendRateLimiter::new(0);
    }
}
