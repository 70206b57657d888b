// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wallet_api::api;
use wallet_api::chain::{AccessClient, HttpAccessClient};
use wallet_api::config::Config;
use wallet_api::events::handlers::DepositHandler;
use wallet_api::events::{ChainEventHandler, ChainEventListener, HaltSignal};
use wallet_api::jobs::rate_limiter::SendRateLimiter;
use wallet_api::jobs::scheduler::{InFlightSet, Scheduler};
use wallet_api::jobs::webhook::WebhookSink;
use wallet_api::jobs::worker::WorkerPool;
use wallet_api::jobs::HandlerRegistry;
use wallet_api::keys::encryption::AesCrypter;
use wallet_api::keys::proposal::ProposalKeyPool;
use wallet_api::keys::{KeyManager, LocalKeyManager, KEY_TYPE_LOCAL};
use wallet_api::service::accounts::{
    AccountService, CreateAccountHandler, JOB_TYPE_CREATE_ACCOUNT,
};
use wallet_api::service::tokens::{
    FungibleWithdrawalHandler, NftWithdrawalHandler, TokenService, TokenSetupHandler,
    JOB_TYPE_FT_WITHDRAWAL, JOB_TYPE_NFT_WITHDRAWAL, JOB_TYPE_TOKEN_SETUP,
};
use wallet_api::service::transactions::TransactionService;
use wallet_api::state::AppState;
use wallet_api::storage::{
    AccountsRepository, JobsRepository, Store, StoredToken, TokensRepository, TransfersRepository,
};
use wallet_api::templates;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal: startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_env()?);

    let store = Arc::new(Store::open(
        Path::new(&config.database_dsn),
        config.database_version.as_deref(),
    )?);
    let jobs_repo = Arc::new(JobsRepository::new(store.clone()));
    let accounts_repo = Arc::new(AccountsRepository::new(store.clone()));
    let tokens_repo = Arc::new(TokensRepository::new(store.clone()));
    let transfers_repo = Arc::new(TransfersRepository::new(store.clone()));

    // Configured-token bootstrap. The process must not come up with an
    // inconsistent token registry, so any failure here is fatal.
    for spec in &config.enabled_tokens {
        tokens_repo.upsert(&StoredToken {
            name: spec.name.clone(),
            address: spec.address.clone(),
            kind: spec.kind,
            created_at: chrono::Utc::now(),
        })?;
    }
    info!(tokens = config.enabled_tokens.len(), "token registry seeded");

    let client: Arc<dyn AccessClient> = Arc::new(HttpAccessClient::new(
        &config.access_api_host,
        config.transaction_timeout,
    )?);

    if config.encryption_key_type != KEY_TYPE_LOCAL {
        return Err(format!(
            "unsupported encryption key type: {}",
            config.encryption_key_type
        )
        .into());
    }
    let crypter = Arc::new(AesCrypter::from_config_key(&config.encryption_key)?);
    let key_manager: Arc<dyn KeyManager> = Arc::new(LocalKeyManager::from_config(
        &config,
        accounts_repo.clone(),
        crypter,
    )?);

    // Proposal-key sequence numbers come from chain account introspection.
    let proposal_keys = Arc::new(
        ProposalKeyPool::from_chain(
            client.clone(),
            config.admin_address.clone(),
            config.admin_proposal_key_count as usize,
        )
        .await?,
    );
    info!(
        address = %config.admin_address,
        proposal_keys = config.admin_proposal_key_count,
        "admin account ready"
    );

    let rate_limiter = Arc::new(SendRateLimiter::new(config.max_tps));
    let halt = Arc::new(HaltSignal::new());
    let webhook = Arc::new(WebhookSink::new(
        config.job_status_webhook.clone(),
        config.job_status_webhook_timeout,
    ));

    let transactions = Arc::new(TransactionService::new(
        client.clone(),
        key_manager.clone(),
        proposal_keys,
        rate_limiter,
        transfers_repo.clone(),
        config.transaction_timeout,
    ));

    let in_flight = InFlightSet::new();
    let (scheduler, queue) = Scheduler::new(
        config.worker_queue_capacity,
        jobs_repo.clone(),
        in_flight.clone(),
        config.db_job_poll_interval,
        config.accepted_grace_period,
        config.reschedulable_grace_period,
    );
    let scheduler = Arc::new(scheduler);

    let create_account_script =
        templates::create_account_script(config.script_path_create_account.as_deref())?;
    let account_service = Arc::new(AccountService::new(
        accounts_repo.clone(),
        jobs_repo.clone(),
        scheduler.clone(),
        key_manager.clone(),
        transactions.clone(),
        create_account_script,
        config.default_account_key_count,
        config.effective_key_weight(),
    ));
    let token_service = Arc::new(TokenService::new(
        tokens_repo.clone(),
        accounts_repo.clone(),
        transfers_repo.clone(),
        jobs_repo.clone(),
        scheduler.clone(),
        transactions,
    ));

    let mut registry = HandlerRegistry::new()
        .register(
            JOB_TYPE_CREATE_ACCOUNT,
            Arc::new(CreateAccountHandler(account_service.clone())),
        )
        .register(
            JOB_TYPE_TOKEN_SETUP,
            Arc::new(TokenSetupHandler(token_service.clone())),
        );
    if !config.disable_fungible_tokens {
        registry = registry.register(
            JOB_TYPE_FT_WITHDRAWAL,
            Arc::new(FungibleWithdrawalHandler(token_service.clone())),
        );
    }
    if !config.disable_non_fungible_tokens {
        registry = registry.register(
            JOB_TYPE_NFT_WITHDRAWAL,
            Arc::new(NftWithdrawalHandler(token_service.clone())),
        );
    }
    let registry = Arc::new(registry);

    // Shutdown order matters: the scheduler stops feeding the queue first,
    // then workers and the listener are cancelled.
    let shutdown = CancellationToken::new();
    let scheduler_token = shutdown.child_token();

    let pool = Arc::new(WorkerPool::new(
        config.worker_count,
        registry,
        jobs_repo.clone(),
        webhook,
        in_flight,
        halt.clone(),
        config.max_job_error_count,
        config.reschedulable_grace_period,
        config.pause_duration,
    ));
    let worker_handles = pool.start(queue, shutdown.clone());
    tokio::spawn(scheduler.clone().run(scheduler_token.clone()));

    if config.disable_chain_events {
        info!("chain event listener disabled");
    } else {
        let deposit_handler: Arc<dyn ChainEventHandler> = Arc::new(DepositHandler::new(
            tokens_repo.list(None)?,
            accounts_repo.clone(),
            transfers_repo.clone(),
        ));
        let listener = ChainEventListener::new(
            client,
            transfers_repo,
            vec![deposit_handler],
            halt.clone(),
            config.events_interval,
            config.events_max_blocks,
            config.events_starting_height,
            config.pause_duration,
        );
        tokio::spawn(listener.run(shutdown.clone()));
    }

    let state = AppState::new(
        config.clone(),
        account_service,
        token_service,
        jobs_repo,
        halt,
    );
    let mut app = api::router(state);
    if !config.server_request_timeout.is_zero() {
        app = app.layer(TimeoutLayer::new(config.server_request_timeout));
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "wallet API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: no new dispatches, give in-queue jobs a moment, then cancel
    // the workers. Anything still leased is rescued on restart after the
    // accepted grace period.
    info!("shutting down");
    scheduler_token.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();
    for handle in worker_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
