// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::get,
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;

use crate::models::{Address, TokenKind};
use crate::state::AppState;

pub mod accounts;
pub mod health;
pub mod jobs;
pub mod tokens;

/// Requests carrying this header (non-empty) are served synchronously:
/// the handler awaits the sealed transaction instead of returning a job.
pub const SYNC_HEADER: &str = "use-sync";

pub fn router(state: AppState) -> Router {
    let mut api_routes = Router::new()
        .route(
            "/accounts",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route("/accounts/{address}", get(accounts::account_details))
        .route("/jobs/{id}", get(jobs::get_job));

    if !state.config.disable_fungible_tokens {
        api_routes = api_routes
            .route(
                "/accounts/{address}/ft-tokens",
                get(tokens::list_ft_tokens),
            )
            .route(
                "/accounts/{address}/ft-tokens/{tokenName}",
                axum::routing::post(tokens::setup_ft_token),
            )
            .route(
                "/accounts/{address}/ft-tokens/{tokenName}/withdrawals",
                get(tokens::list_ft_withdrawals).post(tokens::create_ft_withdrawal),
            )
            .route(
                "/accounts/{address}/ft-tokens/{tokenName}/withdrawals/{transactionId}",
                get(tokens::get_ft_withdrawal),
            )
            .route(
                "/accounts/{address}/ft-tokens/{tokenName}/deposits",
                get(tokens::list_ft_deposits),
            )
            .route(
                "/accounts/{address}/ft-tokens/{tokenName}/deposits/{transactionId}",
                get(tokens::get_ft_deposit),
            );
    }

    if !state.config.disable_non_fungible_tokens {
        api_routes = api_routes
            .route(
                "/accounts/{address}/nft-tokens",
                get(tokens::list_nft_tokens),
            )
            .route(
                "/accounts/{address}/nft-tokens/{tokenName}",
                axum::routing::post(tokens::setup_nft_token),
            )
            .route(
                "/accounts/{address}/nft-tokens/{tokenName}/withdrawals",
                get(tokens::list_nft_withdrawals).post(tokens::create_nft_withdrawal),
            )
            .route(
                "/accounts/{address}/nft-tokens/{tokenName}/withdrawals/{transactionId}",
                get(tokens::get_nft_withdrawal),
            )
            .route(
                "/accounts/{address}/nft-tokens/{tokenName}/deposits",
                get(tokens::list_nft_deposits),
            )
            .route(
                "/accounts/{address}/nft-tokens/{tokenName}/deposits/{transactionId}",
                get(tokens::get_nft_deposit),
            );
    }

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .merge(api_routes)
        .route("/api-doc/openapi.json", get(openapi_json))
        .layer(build_cors_layer())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build CORS layer from environment configuration.
///
/// - If `CORS_ALLOWED_ORIGINS` is set, only those origins are allowed
///   (comma-separated). Entries that do not parse as header values are
///   logged and skipped.
/// - If not set, falls back to permissive CORS (development only).
fn build_cors_layer() -> CorsLayer {
    if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
        let mut allowed = Vec::new();
        for origin in origins.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match origin.parse() {
                Ok(value) => allowed.push(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "CORS: skipping malformed origin");
                }
            }
        }
        tracing::info!(origins = %origins, "CORS: restricting to configured origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set - using permissive CORS (development only)");
        CorsLayer::permissive()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Account endpoints
        accounts::list_accounts,
        accounts::create_account,
        accounts::account_details,
        // Fungible token endpoints
        tokens::list_ft_tokens,
        tokens::setup_ft_token,
        tokens::create_ft_withdrawal,
        tokens::list_ft_withdrawals,
        tokens::get_ft_withdrawal,
        tokens::list_ft_deposits,
        tokens::get_ft_deposit,
        // Non-fungible token endpoints
        tokens::list_nft_tokens,
        tokens::setup_nft_token,
        tokens::create_nft_withdrawal,
        tokens::list_nft_withdrawals,
        tokens::get_nft_withdrawal,
        tokens::list_nft_deposits,
        tokens::get_nft_deposit,
        // Job endpoints
        jobs::get_job,
        // Health endpoints
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Address,
            TokenKind,
            accounts::AccountCreationResponse,
            tokens::WithdrawalRequest,
            tokens::TokenMutationResponse,
            crate::jobs::Job,
            crate::jobs::JobState,
            crate::chain::ChainEvent,
            crate::storage::repository::accounts::StoredAccount,
            crate::storage::repository::accounts::StoredAccountToken,
            crate::storage::StoredToken,
            crate::storage::StoredTransaction,
            crate::storage::TransactionState,
            crate::storage::StoredTokenTransfer,
            crate::storage::TransferDirection,
            health::HealthResponse,
            health::HealthChecks,
            health::ReadyResponse
        )
    ),
    tags(
        (name = "Accounts", description = "Custodial account lifecycle"),
        (name = "Fungible Tokens", description = "Vault setup, withdrawals and deposits"),
        (name = "Non-Fungible Tokens", description = "Collection setup, withdrawals and deposits"),
        (name = "Jobs", description = "Asynchronous job status"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
struct ApiDoc;
