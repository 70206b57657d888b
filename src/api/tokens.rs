// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token endpoints: vault setup, withdrawals, deposits.
//!
//! Fungible and non-fungible tokens share the same handler bodies; the
//! route pairs only pin the [`TokenKind`]. Mutating endpoints honour the
//! `use-sync` header the same way account creation does.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::accounts::{parse_address, wants_sync};
use crate::error::ApiError;
use crate::jobs::Job;
use crate::models::TokenKind;
use crate::service::tokens::WithdrawalParams;
use crate::state::AppState;
use crate::storage::repository::accounts::StoredAccountToken;
use crate::storage::{StoredTokenTransfer, StoredTransaction, TransferDirection};

/// Body of `POST …/withdrawals`.
///
/// Fungible withdrawals carry `amount`; non-fungible ones carry
/// `token_id`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WithdrawalRequest {
    pub recipient: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub token_id: Option<u64>,
}

/// Response of a mutating token endpoint: the job by default, the sealed
/// transaction when `use-sync` is set.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum TokenMutationResponse {
    Job(Job),
    Transaction(StoredTransaction),
}

// =============================================================================
// Shared handler bodies
// =============================================================================

async fn account_tokens(
    state: AppState,
    address: String,
    kind: TokenKind,
) -> Result<Json<Vec<StoredAccountToken>>, ApiError> {
    let address = parse_address(&address)?;
    let tokens = state.tokens.account_tokens(&address, Some(kind))?;
    Ok(Json(tokens))
}

async fn setup_token(
    state: AppState,
    headers: HeaderMap,
    address: String,
    token_name: String,
    kind: TokenKind,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    let address = parse_address(&address)?;

    let response = if wants_sync(&headers) {
        let tx = state
            .tokens
            .setup_sync(&address, &token_name, kind, CancellationToken::new())
            .await?;
        TokenMutationResponse::Transaction(tx)
    } else {
        TokenMutationResponse::Job(state.tokens.setup_async(&address, &token_name, kind)?)
    };
    Ok((StatusCode::CREATED, Json(response)))
}

async fn create_withdrawal(
    state: AppState,
    headers: HeaderMap,
    address: String,
    token_name: String,
    request: WithdrawalRequest,
    kind: TokenKind,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    let sender = parse_address(&address)?;
    let recipient = parse_address(&request.recipient)?;

    let params = WithdrawalParams {
        sender,
        token_name,
        recipient,
        amount: request.amount,
        nft_id: request.token_id,
    };

    let response = if wants_sync(&headers) {
        let tx = state
            .tokens
            .withdrawal_sync(params, kind, CancellationToken::new())
            .await?;
        TokenMutationResponse::Transaction(tx)
    } else {
        TokenMutationResponse::Job(state.tokens.withdrawal_async(params, kind)?)
    };
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_transfers(
    state: AppState,
    address: String,
    token_name: String,
    direction: TransferDirection,
) -> Result<Json<Vec<StoredTokenTransfer>>, ApiError> {
    let address = parse_address(&address)?;
    let transfers = state
        .tokens
        .list_transfers(&address, &token_name, direction)?;
    Ok(Json(transfers))
}

async fn get_transfer(
    state: AppState,
    address: String,
    token_name: String,
    transaction_id: String,
    direction: TransferDirection,
) -> Result<Json<StoredTokenTransfer>, ApiError> {
    let address = parse_address(&address)?;
    let mut transfers =
        state
            .tokens
            .find_transfers(&address, &token_name, direction, &transaction_id)?;
    if transfers.is_empty() {
        return Err(ApiError::not_found(format!(
            "no transfer of {token_name} in transaction {transaction_id}"
        )));
    }
    Ok(Json(transfers.remove(0)))
}

// =============================================================================
// Fungible token routes
// =============================================================================

/// List the fungible tokens set up on an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/ft-tokens",
    tag = "Fungible Tokens",
    params(("address" = String, Path, description = "Account address")),
    responses(
        (status = 200, description = "Vault-setup records", body = [StoredAccountToken]),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn list_ft_tokens(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<StoredAccountToken>>, ApiError> {
    account_tokens(state, address, TokenKind::Fungible).await
}

/// Set up a fungible token vault on an account.
#[utoipa::path(
    post,
    path = "/accounts/{address}/ft-tokens/{tokenName}",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 201, description = "Setup queued or completed", body = TokenMutationResponse),
        (status = 404, description = "Unknown account or token")
    )
)]
pub async fn setup_ft_token(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    setup_token(state, headers, address, token_name, TokenKind::Fungible).await
}

/// Withdraw a fungible token to a recipient address.
#[utoipa::path(
    post,
    path = "/accounts/{address}/ft-tokens/{tokenName}/withdrawals",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Sender account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    request_body = WithdrawalRequest,
    responses(
        (status = 201, description = "Withdrawal queued or sealed", body = TokenMutationResponse),
        (status = 400, description = "Malformed recipient or amount"),
        (status = 404, description = "Unknown account or token")
    )
)]
pub async fn create_ft_withdrawal(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    create_withdrawal(
        state,
        headers,
        address,
        token_name,
        request,
        TokenKind::Fungible,
    )
    .await
}

/// List fungible withdrawals of an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/ft-tokens/{tokenName}/withdrawals",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 200, description = "Withdrawals", body = [StoredTokenTransfer])
    )
)]
pub async fn list_ft_withdrawals(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
) -> Result<Json<Vec<StoredTokenTransfer>>, ApiError> {
    list_transfers(state, address, token_name, TransferDirection::Withdrawal).await
}

/// One fungible withdrawal by transaction id.
#[utoipa::path(
    get,
    path = "/accounts/{address}/ft-tokens/{tokenName}/withdrawals/{transactionId}",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name"),
        ("transactionId" = String, Path, description = "Transaction id")
    ),
    responses(
        (status = 200, description = "Withdrawal", body = StoredTokenTransfer),
        (status = 404, description = "No such withdrawal")
    )
)]
pub async fn get_ft_withdrawal(
    State(state): State<AppState>,
    Path((address, token_name, transaction_id)): Path<(String, String, String)>,
) -> Result<Json<StoredTokenTransfer>, ApiError> {
    get_transfer(
        state,
        address,
        token_name,
        transaction_id,
        TransferDirection::Withdrawal,
    )
    .await
}

/// List fungible deposits credited to an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/ft-tokens/{tokenName}/deposits",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 200, description = "Deposits", body = [StoredTokenTransfer])
    )
)]
pub async fn list_ft_deposits(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
) -> Result<Json<Vec<StoredTokenTransfer>>, ApiError> {
    list_transfers(state, address, token_name, TransferDirection::Deposit).await
}

/// One fungible deposit by transaction id.
#[utoipa::path(
    get,
    path = "/accounts/{address}/ft-tokens/{tokenName}/deposits/{transactionId}",
    tag = "Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name"),
        ("transactionId" = String, Path, description = "Transaction id")
    ),
    responses(
        (status = 200, description = "Deposit", body = StoredTokenTransfer),
        (status = 404, description = "No such deposit")
    )
)]
pub async fn get_ft_deposit(
    State(state): State<AppState>,
    Path((address, token_name, transaction_id)): Path<(String, String, String)>,
) -> Result<Json<StoredTokenTransfer>, ApiError> {
    get_transfer(
        state,
        address,
        token_name,
        transaction_id,
        TransferDirection::Deposit,
    )
    .await
}

// =============================================================================
// Non-fungible token routes
// =============================================================================

/// List the non-fungible tokens set up on an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/nft-tokens",
    tag = "Non-Fungible Tokens",
    params(("address" = String, Path, description = "Account address")),
    responses(
        (status = 200, description = "Collection-setup records", body = [StoredAccountToken]),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn list_nft_tokens(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<StoredAccountToken>>, ApiError> {
    account_tokens(state, address, TokenKind::NonFungible).await
}

/// Set up a non-fungible token collection on an account.
#[utoipa::path(
    post,
    path = "/accounts/{address}/nft-tokens/{tokenName}",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 201, description = "Setup queued or completed", body = TokenMutationResponse),
        (status = 404, description = "Unknown account or token")
    )
)]
pub async fn setup_nft_token(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    setup_token(state, headers, address, token_name, TokenKind::NonFungible).await
}

/// Withdraw a non-fungible token to a recipient address.
#[utoipa::path(
    post,
    path = "/accounts/{address}/nft-tokens/{tokenName}/withdrawals",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Sender account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    request_body = WithdrawalRequest,
    responses(
        (status = 201, description = "Withdrawal queued or sealed", body = TokenMutationResponse),
        (status = 400, description = "Malformed recipient or missing token_id"),
        (status = 404, description = "Unknown account or token")
    )
)]
pub async fn create_nft_withdrawal(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<TokenMutationResponse>), ApiError> {
    create_withdrawal(
        state,
        headers,
        address,
        token_name,
        request,
        TokenKind::NonFungible,
    )
    .await
}

/// List non-fungible withdrawals of an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/nft-tokens/{tokenName}/withdrawals",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 200, description = "Withdrawals", body = [StoredTokenTransfer])
    )
)]
pub async fn list_nft_withdrawals(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
) -> Result<Json<Vec<StoredTokenTransfer>>, ApiError> {
    list_transfers(state, address, token_name, TransferDirection::Withdrawal).await
}

/// One non-fungible withdrawal by transaction id.
#[utoipa::path(
    get,
    path = "/accounts/{address}/nft-tokens/{tokenName}/withdrawals/{transactionId}",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name"),
        ("transactionId" = String, Path, description = "Transaction id")
    ),
    responses(
        (status = 200, description = "Withdrawal", body = StoredTokenTransfer),
        (status = 404, description = "No such withdrawal")
    )
)]
pub async fn get_nft_withdrawal(
    State(state): State<AppState>,
    Path((address, token_name, transaction_id)): Path<(String, String, String)>,
) -> Result<Json<StoredTokenTransfer>, ApiError> {
    get_transfer(
        state,
        address,
        token_name,
        transaction_id,
        TransferDirection::Withdrawal,
    )
    .await
}

/// List non-fungible deposits credited to an account.
#[utoipa::path(
    get,
    path = "/accounts/{address}/nft-tokens/{tokenName}/deposits",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name")
    ),
    responses(
        (status = 200, description = "Deposits", body = [StoredTokenTransfer])
    )
)]
pub async fn list_nft_deposits(
    State(state): State<AppState>,
    Path((address, token_name)): Path<(String, String)>,
) -> Result<Json<Vec<StoredTokenTransfer>>, ApiError> {
    list_transfers(state, address, token_name, TransferDirection::Deposit).await
}

/// One non-fungible deposit by transaction id.
#[utoipa::path(
    get,
    path = "/accounts/{address}/nft-tokens/{tokenName}/deposits/{transactionId}",
    tag = "Non-Fungible Tokens",
    params(
        ("address" = String, Path, description = "Account address"),
        ("tokenName" = String, Path, description = "Token name"),
        ("transactionId" = String, Path, description = "Transaction id")
    ),
    responses(
        (status = 200, description = "Deposit", body = StoredTokenTransfer),
        (status = 404, description = "No such deposit")
    )
)]
pub async fn get_nft_deposit(
    State(state): State<AppState>,
    Path((address, token_name, transaction_id)): Path<(String, String, String)>,
) -> Result<Json<StoredTokenTransfer>, ApiError> {
    get_transfer(
        state,
        address,
        token_name,
        transaction_id,
        TransferDirection::Deposit,
    )
    .await
}
