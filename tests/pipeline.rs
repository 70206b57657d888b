// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end pipeline scenarios against an in-process mock access node:
//! async account creation, queue overflow, transient submit failures,
//! retry exhaustion, crash rescue, and deposit crediting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wallet_api::chain::types::{
    AccountKey, BlockHeader, HashAlgorithm, OnChainAccount, SignatureAlgorithm, TransactionResult,
    TransactionStatus, ACCOUNT_CREATED_EVENT,
};
use wallet_api::chain::{AccessClient, ChainError, ChainEvent, SignedTransaction};
use wallet_api::config::{Config, IdempotencyStoreType};
use wallet_api::events::handlers::DepositHandler;
use wallet_api::events::{ChainEventHandler, ChainEventListener, HaltSignal};
use wallet_api::jobs::rate_limiter::SendRateLimiter;
use wallet_api::jobs::scheduler::{InFlightSet, Scheduler};
use wallet_api::jobs::webhook::WebhookSink;
use wallet_api::jobs::worker::WorkerPool;
use wallet_api::jobs::{HandlerRegistry, Job, JobState};
use wallet_api::keys::encryption::AesCrypter;
use wallet_api::keys::local::LocalSigner;
use wallet_api::keys::proposal::ProposalKeyPool;
use wallet_api::keys::{KeyManager, LocalKeyManager};
use wallet_api::models::{Address, TokenKind};
use wallet_api::service::accounts::{AccountService, CreateAccountHandler, JOB_TYPE_CREATE_ACCOUNT};
use wallet_api::service::tokens::{
    FungibleWithdrawalHandler, NftWithdrawalHandler, TokenService, TokenSetupHandler,
    WithdrawalParams, JOB_TYPE_FT_WITHDRAWAL, JOB_TYPE_NFT_WITHDRAWAL, JOB_TYPE_TOKEN_SETUP,
};
use wallet_api::service::transactions::TransactionService;
use wallet_api::storage::{
    AccountsRepository, JobsRepository, Store, StoredToken, StoredTransaction, TokensRepository,
    TransactionState, TransferDirection, TransfersRepository,
};
use wallet_api::templates;

const ADMIN: &str = "0xf8d6e0586b0a20c7";
const TOKEN_ADDRESS: &str = "0x0ae53cb6e3f42a79";

// =============================================================================
// Mock access node
// =============================================================================

struct MockAccessClient {
    /// Fail this many submissions with a timeout before accepting.
    send_failures: AtomicU32,
    send_count: AtomicU32,
    next_tx: AtomicU32,
    latest_height: AtomicU64,
    results: Mutex<HashMap<String, TransactionResult>>,
    chain_events: Mutex<Vec<ChainEvent>>,
}

impl MockAccessClient {
    fn new(send_failures: u32) -> Arc<Self> {
        Arc::new(Self {
            send_failures: AtomicU32::new(send_failures),
            send_count: AtomicU32::new(0),
            next_tx: AtomicU32::new(0),
            latest_height: AtomicU64::new(10),
            results: Mutex::new(HashMap::new()),
            chain_events: Mutex::new(Vec::new()),
        })
    }

    fn sends(&self) -> u32 {
        self.send_count.load(Ordering::SeqCst)
    }

    fn set_height(&self, height: u64) {
        self.latest_height.store(height, Ordering::SeqCst);
    }

    fn push_chain_event(&self, event: ChainEvent) {
        self.chain_events.lock().unwrap().push(event);
    }

    fn install_result(&self, result: TransactionResult) {
        self.results
            .lock()
            .unwrap()
            .insert(result.transaction_id.clone(), result);
    }
}

#[async_trait]
impl AccessClient for MockAccessClient {
    async fn get_account(&self, address: &Address) -> Result<OnChainAccount, ChainError> {
        Ok(OnChainAccount {
            address: address.clone(),
            balance: 0,
            keys: (0..5)
                .map(|index| AccountKey {
                    index,
                    public_key: String::new(),
                    sign_algo: SignatureAlgorithm::EcdsaP256,
                    hash_algo: HashAlgorithm::Sha3_256,
                    weight: 1000,
                    sequence_number: 0,
                    revoked: false,
                })
                .collect(),
        })
    }

    async fn get_latest_block(&self) -> Result<BlockHeader, ChainError> {
        let height = self.latest_height.load(Ordering::SeqCst);
        Ok(BlockHeader {
            id: format!("block-{height}"),
            height,
        })
    }

    async fn get_events(
        &self,
        event_type: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        Ok(self
            .chain_events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.event_type == event_type && e.block_height >= from && e.block_height <= to
            })
            .cloned()
            .collect())
    }

    async fn send_transaction(&self, _tx: &SignedTransaction) -> Result<String, ChainError> {
        if self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(ChainError::Timeout);
        }

        self.send_count.fetch_add(1, Ordering::SeqCst);
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let transaction_id = format!("tx{n:04}");
        let height = self.latest_height.load(Ordering::SeqCst);

        // Every accepted transaction seals immediately, emitting an
        // account-creation event (ignored by non-account operations).
        let created: Address = format!("0x{:016x}", 0xa000 + n as u64).parse().unwrap();
        self.install_result(TransactionResult {
            transaction_id: transaction_id.clone(),
            status: TransactionStatus::Sealed,
            error: None,
            block_height: height,
            events: vec![ChainEvent {
                event_type: ACCOUNT_CREATED_EVENT.to_string(),
                transaction_id: transaction_id.clone(),
                block_height: height,
                event_index: 0,
                payload: serde_json::json!({ "address": created.as_str() }),
            }],
        });
        Ok(transaction_id)
    }

    async fn get_transaction_result(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionResult, ChainError> {
        self.results
            .lock()
            .unwrap()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("transaction {transaction_id}")))
    }
}

// =============================================================================
// Harness
// =============================================================================

fn test_config() -> Config {
    let admin_key = LocalSigner::generate(SignatureAlgorithm::EcdsaP256, HashAlgorithm::Sha3_256);
    Config {
        disable_raw_transactions: false,
        disable_fungible_tokens: false,
        disable_non_fungible_tokens: false,
        disable_chain_events: false,
        disable_idempotency_middleware: false,
        idempotency_store_type: IdempotencyStoreType::Local,
        idempotency_redis_url: None,
        admin_address: ADMIN.parse().unwrap(),
        admin_key_index: 0,
        admin_key_type: "local".into(),
        admin_private_key: hex::encode(admin_key.secret_bytes()),
        admin_proposal_key_count: 2,
        default_key_type: "local".into(),
        default_key_index: 0,
        default_key_weight: -1,
        default_sign_algo: SignatureAlgorithm::EcdsaP256,
        default_hash_algo: HashAlgorithm::Sha3_256,
        default_account_key_count: 1,
        encryption_key: "00".repeat(32),
        encryption_key_type: "local".into(),
        database_dsn: "unused".into(),
        database_type: "embedded".into(),
        database_version: None,
        host: "127.0.0.1".into(),
        port: 0,
        server_request_timeout: Duration::from_secs(5),
        access_api_host: "http://mock".into(),
        chain_id: "local".into(),
        enabled_tokens: Vec::new(),
        script_path_create_account: None,
        worker_queue_capacity: 16,
        worker_count: 2,
        job_status_webhook: None,
        job_status_webhook_timeout: Duration::from_secs(1),
        max_tps: 100,
        max_job_error_count: 10,
        db_job_poll_interval: Duration::from_millis(50),
        accepted_grace_period: Duration::from_millis(200),
        reschedulable_grace_period: Duration::from_millis(100),
        pause_duration: Duration::from_millis(50),
        transaction_timeout: Duration::ZERO,
        events_starting_height: 0,
        events_max_blocks: 100,
        events_interval: Duration::from_millis(20),
    }
}

struct Harness {
    client: Arc<MockAccessClient>,
    jobs: Arc<JobsRepository>,
    accounts_repo: Arc<AccountsRepository>,
    tokens_repo: Arc<TokensRepository>,
    transfers: Arc<TransfersRepository>,
    scheduler: Arc<Scheduler>,
    pool: Arc<WorkerPool>,
    queue: Option<tokio::sync::mpsc::Receiver<Uuid>>,
    shutdown: CancellationToken,
    account_service: Arc<AccountService>,
    token_service: Arc<TokenService>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn new(config: Config, send_failures: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("test.redb"), None).unwrap());
        let jobs = Arc::new(JobsRepository::new(store.clone()));
        let accounts_repo = Arc::new(AccountsRepository::new(store.clone()));
        let tokens_repo = Arc::new(TokensRepository::new(store.clone()));
        let transfers = Arc::new(TransfersRepository::new(store));

        tokens_repo
            .upsert(&StoredToken {
                name: "ExampleToken".into(),
                address: TOKEN_ADDRESS.parse().unwrap(),
                kind: TokenKind::Fungible,
                created_at: Utc::now(),
            })
            .unwrap();

        let client = MockAccessClient::new(send_failures);
        let crypter = Arc::new(AesCrypter::from_config_key(&config.encryption_key).unwrap());
        let key_manager: Arc<dyn KeyManager> = Arc::new(
            LocalKeyManager::from_config(&config, accounts_repo.clone(), crypter).unwrap(),
        );

        let proposal_keys = Arc::new(
            ProposalKeyPool::from_chain(
                client.clone(),
                config.admin_address.clone(),
                config.admin_proposal_key_count as usize,
            )
            .await
            .unwrap(),
        );

        let transactions = Arc::new(TransactionService::new(
            client.clone(),
            key_manager.clone(),
            proposal_keys,
            Arc::new(SendRateLimiter::new(config.max_tps)),
            transfers.clone(),
            config.transaction_timeout,
        ));

        let in_flight = InFlightSet::new();
        let (scheduler, queue) = Scheduler::new(
            config.worker_queue_capacity,
            jobs.clone(),
            in_flight.clone(),
            config.db_job_poll_interval,
            config.accepted_grace_period,
            config.reschedulable_grace_period,
        );
        let scheduler = Arc::new(scheduler);

        let account_service = Arc::new(AccountService::new(
            accounts_repo.clone(),
            jobs.clone(),
            scheduler.clone(),
            key_manager.clone(),
            transactions.clone(),
            templates::create_account_script(None).unwrap(),
            config.default_account_key_count,
            config.effective_key_weight(),
        ));
        let token_service = Arc::new(TokenService::new(
            tokens_repo.clone(),
            accounts_repo.clone(),
            transfers.clone(),
            jobs.clone(),
            scheduler.clone(),
            transactions,
        ));

        let registry = Arc::new(
            HandlerRegistry::new()
                .register(
                    JOB_TYPE_CREATE_ACCOUNT,
                    Arc::new(CreateAccountHandler(account_service.clone())),
                )
                .register(
                    JOB_TYPE_TOKEN_SETUP,
                    Arc::new(TokenSetupHandler(token_service.clone())),
                )
                .register(
                    JOB_TYPE_FT_WITHDRAWAL,
                    Arc::new(FungibleWithdrawalHandler(token_service.clone())),
                )
                .register(
                    JOB_TYPE_NFT_WITHDRAWAL,
                    Arc::new(NftWithdrawalHandler(token_service.clone())),
                ),
        );

        let pool = Arc::new(WorkerPool::new(
            config.worker_count,
            registry,
            jobs.clone(),
            Arc::new(WebhookSink::new(None, Duration::from_secs(1))),
            in_flight,
            Arc::new(HaltSignal::new()),
            config.max_job_error_count,
            config.reschedulable_grace_period,
            config.pause_duration,
        ));

        Self {
            client,
            jobs,
            accounts_repo,
            tokens_repo,
            transfers,
            scheduler,
            pool,
            queue: Some(queue),
            shutdown: CancellationToken::new(),
            account_service,
            token_service,
            _dir: dir,
        }
    }

    /// Start workers and the scheduler poll loop.
    fn start(&mut self) {
        let queue = self.queue.take().expect("workers already started");
        self.pool.clone().start(queue, self.shutdown.clone());
        tokio::spawn(self.scheduler.clone().run(self.shutdown.child_token()));
    }

    async fn wait_for_state(&self, id: &Uuid, state: JobState) -> Job {
        for _ in 0..400 {
            let job = self.jobs.find(id).unwrap();
            if job.state == state {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "job never reached {state:?}, currently {:?}",
            self.jobs.find(id).unwrap().state
        );
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn async_account_creation_completes() {
    let mut harness = Harness::new(test_config(), 0).await;
    harness.start();

    let job = harness.account_service.create_async().unwrap();
    assert_eq!(job.state, JobState::Init);

    let done = harness.wait_for_state(&job.id, JobState::Complete).await;

    // The result carries the new address and the account is persisted with
    // a usable key.
    let address: Address = done.result.unwrap()["address"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(harness.accounts_repo.exists(&address).unwrap());
    assert!(harness
        .accounts_repo
        .find_account_key(&address)
        .unwrap()
        .is_some());

    // The transaction id was persisted and the row sealed.
    assert!(done.transaction_id.is_some());
    let tx = harness
        .transfers
        .find_transaction_by_job(&done.id)
        .unwrap()
        .unwrap();
    assert_eq!(tx.state, TransactionState::SealedOk);
    assert_eq!(harness.client.sends(), 1);
}

#[tokio::test]
async fn queue_overflow_parks_and_later_rescues() {
    let mut config = test_config();
    config.worker_queue_capacity = 2;
    let mut harness = Harness::new(config, 0).await;

    // Workers not started: the queue holds two ids, the third is parked.
    let first = harness.account_service.create_async().unwrap();
    let second = harness.account_service.create_async().unwrap();
    let third = harness.account_service.create_async().unwrap();

    assert_eq!(first.state, JobState::Init);
    assert_eq!(second.state, JobState::Init);
    assert_eq!(third.state, JobState::NoAvailableWorkers);

    // Once workers and the poller run, the grace period elapses and the
    // parked job is picked up.
    harness.start();
    harness.wait_for_state(&first.id, JobState::Complete).await;
    harness.wait_for_state(&second.id, JobState::Complete).await;
    harness.wait_for_state(&third.id, JobState::Complete).await;
}

#[tokio::test]
async fn transient_submit_failures_retry_until_success() {
    let mut harness = Harness::new(test_config(), 2).await;
    harness.start();

    let job = harness.account_service.create_async().unwrap();
    let done = harness.wait_for_state(&job.id, JobState::Complete).await;

    // Two timeouts, then success: the error count sticks at two.
    assert_eq!(done.error_count, 2);
    assert_eq!(harness.client.sends(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_terminally() {
    let mut config = test_config();
    config.max_job_error_count = 3;
    let mut harness = Harness::new(config, u32::MAX).await;
    harness.start();

    let job = harness.account_service.create_async().unwrap();
    let done = harness.wait_for_state(&job.id, JobState::Failed).await;

    assert_eq!(done.error_count, 3);
    assert_eq!(harness.client.sends(), 0);

    // Terminal states are sticky.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.jobs.find(&job.id).unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn orphaned_job_with_transaction_id_is_rescued_without_resubmitting() {
    let mut harness = Harness::new(test_config(), 0).await;

    let sender: Address = "0x00000000000000aa".parse().unwrap();

    // A withdrawal job died mid-flight in a "previous process": leased,
    // transaction submitted and persisted, seal never recorded.
    let mut job = Job::new(
        JOB_TYPE_FT_WITHDRAWAL,
        serde_json::json!({
            "address": sender.as_str(),
            "token_name": "ExampleToken",
            "recipient": "0x00000000000000bb",
            "amount": "1.5",
        }),
    );
    job.transaction_id = Some("txdead".into());
    harness.jobs.insert(&job).unwrap();
    let mut leased = harness.jobs.find(&job.id).unwrap();
    leased.state = JobState::Accepted;
    harness.jobs.update(&mut leased).unwrap();

    harness
        .transfers
        .upsert_transaction(&StoredTransaction {
            transaction_id: "txdead".into(),
            job_id: job.id,
            payer_address: ADMIN.parse().unwrap(),
            proposer_address: ADMIN.parse().unwrap(),
            authorizers: vec![sender.clone()],
            script_hash: "00".repeat(32),
            state: TransactionState::Pending,
            block_height: None,
            events: vec![],
            created_at: Utc::now(),
        })
        .unwrap();

    // The chain knows the transaction sealed fine.
    harness.client.install_result(TransactionResult {
        transaction_id: "txdead".into(),
        status: TransactionStatus::Sealed,
        error: None,
        block_height: 9,
        events: vec![],
    });

    // After the accepted grace period the poller re-dispatches; the
    // handler resumes from the chain instead of submitting again.
    tokio::time::sleep(Duration::from_millis(250)).await;
    harness.start();

    let done = harness.wait_for_state(&job.id, JobState::Complete).await;
    assert_eq!(
        done.result.unwrap()["transaction_id"].as_str().unwrap(),
        "txdead"
    );
    assert_eq!(harness.client.sends(), 0, "rescue must not resubmit");

    let tx = harness.transfers.get_transaction("txdead").unwrap().unwrap();
    assert_eq!(tx.state, TransactionState::SealedOk);

    // The withdrawal row exists exactly once.
    let rows = harness
        .transfers
        .list_transfers(&sender, "ExampleToken", TransferDirection::Withdrawal)
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn deposit_events_credit_once_and_advance_the_watermark() {
    let harness = Harness::new(test_config(), 0).await;

    let recipient: Address = "0x00000000000000cc".parse().unwrap();
    harness.accounts_repo.insert(&recipient).unwrap();

    let deposit_handler: Arc<dyn ChainEventHandler> = Arc::new(DepositHandler::new(
        harness.tokens_repo.list(None).unwrap(),
        harness.accounts_repo.clone(),
        harness.transfers.clone(),
    ));
    let event_type = deposit_handler.event_types()[0].clone();

    let listener = ChainEventListener::new(
        harness.client.clone(),
        harness.transfers.clone(),
        vec![deposit_handler],
        Arc::new(HaltSignal::new()),
        Duration::from_millis(20),
        100,
        0,
        Duration::from_millis(20),
    );
    let cancel = CancellationToken::new();
    tokio::spawn(listener.run(cancel.clone()));

    // First tick initialises the watermark to the chain head (10); history
    // is not replayed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.transfers.get_event_height(&event_type).unwrap(), 10);

    // A deposit lands at height 11.
    harness.client.push_chain_event(ChainEvent {
        event_type: event_type.clone(),
        transaction_id: "txdeposit".into(),
        block_height: 11,
        event_index: 0,
        payload: serde_json::json!({ "amount": "2.5", "to": recipient.as_str() }),
    });
    harness.client.set_height(12);

    let mut credited = Vec::new();
    for _ in 0..100 {
        credited = harness
            .transfers
            .list_transfers(&recipient, "ExampleToken", TransferDirection::Deposit)
            .unwrap();
        if !credited.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(credited.len(), 1);
    assert_eq!(credited[0].amount.as_deref(), Some("2.5"));

    // The watermark reached the head and further ticks change nothing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.transfers.get_event_height(&event_type).unwrap(), 12);
    let credited = harness
        .transfers
        .list_transfers(&recipient, "ExampleToken", TransferDirection::Deposit)
        .unwrap();
    assert_eq!(credited.len(), 1, "replay must not double credit");

    cancel.cancel();
}

#[tokio::test]
async fn sync_withdrawal_returns_the_sealed_transaction() {
    let mut harness = Harness::new(test_config(), 0).await;
    harness.start();

    // Create the sending account first (sync, same pipeline).
    let sender = harness
        .account_service
        .create_sync(CancellationToken::new())
        .await
        .unwrap();

    let tx = harness
        .token_service
        .withdrawal_sync(
            WithdrawalParams {
                sender: sender.address.clone(),
                token_name: "ExampleToken".into(),
                recipient: "0x00000000000000bb".parse().unwrap(),
                amount: Some("1.5".into()),
                nft_id: None,
            },
            TokenKind::Fungible,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(tx.state, TransactionState::SealedOk);
    assert_eq!(tx.payer_address.as_str(), ADMIN);
    assert_eq!(tx.authorizers, vec![sender.address.clone()]);

    let rows = harness
        .transfers
        .list_transfers(&sender.address, "ExampleToken", TransferDirection::Withdrawal)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount.as_deref(), Some("1.5"));
}

#[tokio::test]
async fn router_serves_health_and_unknown_job_is_404() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let harness = Harness::new(test_config(), 0).await;
    let state = wallet_api::state::AppState::new(
        Arc::new(test_config()),
        harness.account_service.clone(),
        harness.token_service.clone(),
        harness.jobs.clone(),
        Arc::new(HaltSignal::new()),
    );
    let app = wallet_api::api::router(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_token_is_rejected_before_any_job_is_created() {
    let harness = Harness::new(test_config(), 0).await;

    let sender: Address = "0x00000000000000aa".parse().unwrap();
    harness.accounts_repo.insert(&sender).unwrap();

    let result = harness.token_service.withdrawal_async(
        WithdrawalParams {
            sender,
            token_name: "NoSuchToken".into(),
            recipient: "0x00000000000000bb".parse().unwrap(),
            amount: Some("1.0".into()),
            nft_id: None,
        },
        TokenKind::Fungible,
    );
    assert!(result.is_err());
    assert_eq!(harness.client.sends(), 0);
}
