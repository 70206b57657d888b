// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::{IntoParams, ToSchema};

use super::SYNC_HEADER;
use crate::error::ApiError;
use crate::jobs::Job;
use crate::models::Address;
use crate::state::AppState;
use crate::storage::repository::accounts::StoredAccount;

/// Query parameters for the account listing.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListAccountsQuery {
    /// Maximum number of results; 0 or absent returns everything.
    pub limit: Option<usize>,
    /// Number of rows to skip.
    pub offset: Option<usize>,
}

/// Response of `POST /accounts`: the job by default, the finished account
/// when the `use-sync` header is set.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum AccountCreationResponse {
    Job(Job),
    Account(StoredAccount),
}

pub(super) fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|e: crate::models::AddressError| ApiError::bad_request(e.to_string()))
}

pub(super) fn wants_sync(headers: &HeaderMap) -> bool {
    headers
        .get(SYNC_HEADER)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// List accounts.
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "Accounts",
    params(ListAccountsQuery),
    responses(
        (status = 200, description = "Accounts", body = [StoredAccount])
    )
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<StoredAccount>>, ApiError> {
    let accounts = state
        .accounts
        .list(query.limit.unwrap_or(0), query.offset.unwrap_or(0))?;
    Ok(Json(accounts))
}

/// Create a new custodial account.
///
/// Returns the queued job, or the finished account when the request
/// carries a non-empty `use-sync` header.
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "Accounts",
    responses(
        (status = 201, description = "Creation queued or completed", body = AccountCreationResponse),
        (status = 503, description = "Chain access node unavailable")
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<AccountCreationResponse>), ApiError> {
    let response = if wants_sync(&headers) {
        let account = state
            .accounts
            .create_sync(CancellationToken::new())
            .await?;
        AccountCreationResponse::Account(account)
    } else {
        AccountCreationResponse::Job(state.accounts.create_async()?)
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Account details.
#[utoipa::path(
    get,
    path = "/accounts/{address}",
    tag = "Accounts",
    params(
        ("address" = String, Path, description = "Account address")
    ),
    responses(
        (status = 200, description = "Account found", body = StoredAccount),
        (status = 400, description = "Malformed address"),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn account_details(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<StoredAccount>, ApiError> {
    let address = parse_address(&address)?;
    let account = state.accounts.details(&address)?;
    Ok(Json(account))
}
