// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Application State
//!
//! Shared state handed to every Axum request handler via the `State`
//! extractor. Everything inside is reference counted; the struct is
//! `Clone` and `Send + Sync` so the router can fan it out across tasks.
//!
//! The proposal-key pool, rate limiter, and handler registry are
//! process-wide singletons created in `main` and injected here — nothing
//! reaches them through ambient globals.

use std::sync::Arc;

use crate::config::Config;
use crate::events::HaltSignal;
use crate::service::accounts::AccountService;
use crate::service::tokens::TokenService;
use crate::storage::JobsRepository;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<AccountService>,
    pub tokens: Arc<TokenService>,
    pub jobs: Arc<JobsRepository>,
    /// Set by the chain event listener while the access node is down.
    pub halt: Arc<HaltSignal>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountService>,
        tokens: Arc<TokenService>,
        jobs: Arc<JobsRepository>,
        halt: Arc<HaltSignal>,
    ) -> Self {
        Self {
            config,
            accounts,
            tokens,
            jobs,
            halt,
        }
    }
}
