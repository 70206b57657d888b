// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Event Listener
//!
//! Background task that tails the chain for the registered event types and
//! dispatches them to handlers (deposit crediting). A per-event-type
//! watermark in `chain_event_status` records the highest definitively
//! processed block; it only advances after every handler succeeded for the
//! window, so a failed window is retried on the next tick and handler
//! idempotency prevents double credit.
//!
//! ## Halting
//!
//! Repeated access node failures flip the shared [`HaltSignal`]; workers
//! consult it before submitting and sleep `PAUSE_DURATION` between checks
//! until the listener recovers.

pub mod handlers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::{AccessClient, ChainError, ChainEvent};
use crate::storage::{StoreError, TransfersRepository};

/// Consecutive tick failures before the service declares itself halted.
const HALT_THRESHOLD: u32 = 3;

/// Shared flag: the access node is unreachable, pause chain-facing work.
pub struct HaltSignal {
    halted: AtomicBool,
}

impl HaltSignal {
    pub fn new() -> Self {
        Self {
            halted: AtomicBool::new(false),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    fn set(&self, halted: bool) {
        self.halted.store(halted, Ordering::Relaxed);
    }
}

impl Default for HaltSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed event payload: {0}")]
    Malformed(String),
}

/// An event consumer wired into the listener at startup.
#[async_trait]
pub trait ChainEventHandler: Send + Sync {
    /// Fully qualified event types this handler wants.
    fn event_types(&self) -> Vec<String>;

    /// Process one event. Must be idempotent: a failed window is replayed.
    async fn handle(&self, event: &ChainEvent) -> Result<(), EventHandlerError>;
}

#[derive(Debug, thiserror::Error)]
enum TickError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

pub struct ChainEventListener {
    client: Arc<dyn AccessClient>,
    transfers: Arc<TransfersRepository>,
    handlers: HashMap<String, Vec<Arc<dyn ChainEventHandler>>>,
    halt: Arc<HaltSignal>,
    interval: Duration,
    max_blocks: u64,
    starting_height: u64,
    pause_duration: Duration,
}

impl ChainEventListener {
    pub fn new(
        client: Arc<dyn AccessClient>,
        transfers: Arc<TransfersRepository>,
        event_handlers: Vec<Arc<dyn ChainEventHandler>>,
        halt: Arc<HaltSignal>,
        interval: Duration,
        max_blocks: u64,
        starting_height: u64,
        pause_duration: Duration,
    ) -> Self {
        let mut handlers: HashMap<String, Vec<Arc<dyn ChainEventHandler>>> = HashMap::new();
        for handler in event_handlers {
            for event_type in handler.event_types() {
                handlers.entry(event_type).or_default().push(handler.clone());
            }
        }

        Self {
            client,
            transfers,
            handlers,
            halt,
            interval,
            max_blocks: max_blocks.max(1),
            starting_height,
            pause_duration,
        }
    }

    /// Run the listener loop until the cancellation token is triggered.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            event_types = self.handlers.len(),
            interval_secs = self.interval.as_secs(),
            "chain event listener starting"
        );

        let mut consecutive_failures = 0u32;
        loop {
            if shutdown.is_cancelled() {
                info!("chain event listener shutting down");
                return;
            }

            match self.tick().await {
                Ok(()) => {
                    consecutive_failures = 0;
                    if self.halt.is_halted() {
                        info!("access node recovered, resuming");
                        self.halt.set(false);
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, failures = consecutive_failures, "listener tick failed");
                    if consecutive_failures >= HALT_THRESHOLD && !self.halt.is_halted() {
                        warn!("access node unreachable, halting chain-facing work");
                        self.halt.set(true);
                    }
                }
            }

            let sleep = if self.halt.is_halted() {
                self.pause_duration
            } else {
                self.interval
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {},
                _ = shutdown.cancelled() => {
                    info!("chain event listener shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every registered event type.
    async fn tick(&self) -> Result<(), TickError> {
        let latest = self.client.get_latest_block().await?;

        for (event_type, handlers) in &self.handlers {
            let watermark = self.transfers.get_event_height(event_type)?;
            let watermark = if watermark == 0 {
                // First run: start at the configured height or the chain
                // head, whichever is later. History before deployment is
                // not replayed.
                let start = self.starting_height.max(latest.height);
                self.transfers.set_event_height(event_type, start)?;
                start
            } else {
                watermark
            };

            let Some((from, to)) = event_window(watermark, self.max_blocks, latest.height) else {
                continue;
            };

            let mut events = self.client.get_events(event_type, from, to).await?;
            events.sort_by_key(|e| (e.block_height, e.event_index));

            for event in &events {
                for handler in handlers {
                    handler.handle(event).await?;
                }
            }

            // Advance only after the whole window succeeded.
            self.transfers.set_event_height(event_type, to)?;
            if !events.is_empty() {
                tracing::debug!(
                    event_type = %event_type,
                    from_height = from,
                    to_height = to,
                    events = events.len(),
                    "processed chain events"
                );
            }
        }
        Ok(())
    }
}

/// Inclusive fetch window above `watermark`, clamped to `max_blocks` and
/// the sealed head. `None` when there is nothing new.
fn event_window(watermark: u64, max_blocks: u64, latest_height: u64) -> Option<(u64, u64)> {
    let from = watermark + 1;
    let to = watermark.saturating_add(max_blocks).min(latest_height);
    if from > to {
        None
    } else {
        Some((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_empty_when_caught_up() {
        assert_eq!(event_window(100, 50, 100), None);
        assert_eq!(event_window(100, 50, 99), None);
    }

    #[test]
    fn window_is_clamped_to_max_blocks() {
        assert_eq!(event_window(100, 50, 1000), Some((101, 150)));
    }

    #[test]
    fn window_is_clamped_to_chain_head() {
        assert_eq!(event_window(100, 50, 120), Some((101, 120)));
    }

    #[test]
    fn halt_signal_round_trips() {
        let signal = HaltSignal::new();
        assert!(!signal.is_halted());
        signal.set(true);
        assert!(signal.is_halted());
        signal.set(false);
        assert!(!signal.is_halted());
    }
}
