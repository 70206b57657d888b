// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access node client.
//!
//! [`AccessClient`] is the thin RPC surface the pipeline depends on;
//! [`HttpAccessClient`] implements it against the access node's JSON HTTP
//! API. Error classification drives the job retry policy: transport-level
//! failures and timeouts are retriable, rejections are not.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::transactions::SignedTransaction;
use super::types::{BlockHeader, ChainEvent, OnChainAccount, TransactionResult};
use crate::models::Address;

/// Errors from the chain access node.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid access API URL: {0}")]
    InvalidUrl(String),

    #[error("access node transport error: {0}")]
    Transport(String),

    #[error("access node call timed out")]
    Timeout,

    #[error("not found on chain: {0}")]
    NotFound(String),

    #[error("rejected by access node: {0}")]
    Rejected(String),

    #[error("malformed access node response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Whether a retry can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Timeout)
    }
}

/// The access node RPC surface consumed by the pipeline.
#[async_trait]
pub trait AccessClient: Send + Sync {
    async fn get_account(&self, address: &Address) -> Result<OnChainAccount, ChainError>;

    /// Latest sealed block.
    async fn get_latest_block(&self) -> Result<BlockHeader, ChainError>;

    /// Events of one type in the inclusive height window `[from, to]`.
    async fn get_events(
        &self,
        event_type: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, ChainError>;

    /// Submit a signed transaction, returning its id.
    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<String, ChainError>;

    async fn get_transaction_result(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionResult, ChainError>;
}

/// HTTP implementation of [`AccessClient`].
pub struct HttpAccessClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SendTransactionResponse {
    transaction_id: String,
}

impl HttpAccessClient {
    /// Create a client for the access node at `base_url`.
    ///
    /// `request_timeout` bounds every call; `Duration::ZERO` disables the
    /// bound.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ChainError::InvalidUrl(base_url.to_string()));
        }

        let mut builder = reqwest::Client::builder();
        if !request_timeout.is_zero() {
            builder = builder.timeout(request_timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(classify_reqwest)?;
        decode(response).await
    }
}

fn classify_reqwest(err: reqwest::Error) -> ChainError {
    if err.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Transport(err.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ChainError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ChainError::NotFound(response.text().await.unwrap_or_default()));
    }
    if status.is_client_error() {
        return Err(ChainError::Rejected(response.text().await.unwrap_or_default()));
    }
    if !status.is_success() {
        return Err(ChainError::Transport(format!("status {status}")));
    }
    response
        .json()
        .await
        .map_err(|e| ChainError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl AccessClient for HttpAccessClient {
    async fn get_account(&self, address: &Address) -> Result<OnChainAccount, ChainError> {
        self.get_json(&format!("/v1/accounts/{address}")).await
    }

    async fn get_latest_block(&self) -> Result<BlockHeader, ChainError> {
        self.get_json("/v1/blocks/latest").await
    }

    async fn get_events(
        &self,
        event_type: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        self.get_json(&format!(
            "/v1/events?type={event_type}&start_height={from}&end_height={to}"
        ))
        .await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<String, ChainError> {
        let response = self
            .client
            .post(self.url("/v1/transactions"))
            .json(tx)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let body: SendTransactionResponse = decode(response).await?;
        Ok(body.transaction_id)
    }

    async fn get_transaction_result(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionResult, ChainError> {
        self.get_json(&format!("/v1/transactions/{transaction_id}/result"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpAccessClient::new("grpc://node:9000", Duration::ZERO).is_err());
        assert!(HttpAccessClient::new("http://node:8080", Duration::ZERO).is_ok());
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = HttpAccessClient::new("http://node:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/v1/blocks/latest"), "http://node:8080/v1/blocks/latest");
    }

    #[test]
    fn retriable_classification() {
        assert!(ChainError::Timeout.is_retriable());
        assert!(ChainError::Transport("connection reset".into()).is_retriable());
        assert!(!ChainError::Rejected("invalid signature".into()).is_retriable());
        assert!(!ChainError::NotFound("tx".into()).is_retriable());
    }
}
