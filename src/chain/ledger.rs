// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Platform ledger client.
//!
//! Thin HTTP client over the ledger chain API.
//!
//! Contract: `POST {base}/v1/transactions` submits a signed ledger action
//! and returns `{"transaction_id": "..."}`; `GET
//! {base}/v1/transactions/{id}` returns `{"finalized": bool}`. The
//! operator key is held by the ledger API service, not by this gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Asset, ChainError, LedgerChain};

/// Poll cadence while waiting for ledger finality.
const FINALITY_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LedgerHttpChain {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
    quantity: String,
    memo: &'a str,
}

#[derive(Deserialize)]
struct ActionResponse {
    transaction_id: String,
}

#[derive(Deserialize)]
struct TransactionStatus {
    finalized: bool,
}

impl LedgerHttpChain {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn submit(&self, request: &ActionRequest<'_>) -> Result<String, ChainError> {
        let url = format!("{}/v1/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Transaction(format!(
                "HTTP {} from ledger for {}",
                response.status(),
                request.action
            )));
        }

        let body: ActionResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;

        Ok(body.transaction_id)
    }
}

#[async_trait]
impl LedgerChain for LedgerHttpChain {
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Asset,
        memo: &str,
    ) -> Result<String, ChainError> {
        self.submit(&ActionRequest {
            action: "transfer",
            from: Some(from),
            to: Some(to),
            quantity: amount.to_string(),
            memo,
        })
        .await
    }

    async fn issue(&self, to: &str, amount: Asset, memo: &str) -> Result<String, ChainError> {
        self.submit(&ActionRequest {
            action: "issue",
            from: None,
            to: Some(to),
            quantity: amount.to_string(),
            memo,
        })
        .await
    }

    async fn retire(&self, from: &str, amount: Asset, memo: &str) -> Result<String, ChainError> {
        self.submit(&ActionRequest {
            action: "retire",
            from: Some(from),
            to: None,
            quantity: amount.to_string(),
            memo,
        })
        .await
    }

    async fn await_finalization(&self, tx_id: &str) -> Result<(), ChainError> {
        let url = format!("{}/v1/transactions/{}", self.base_url, tx_id);

        loop {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?;

            if !response.status().is_success() {
                return Err(ChainError::Rpc(format!(
                    "HTTP {} from ledger status endpoint",
                    response.status()
                )));
            }

            let status: TransactionStatus = response
                .json()
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?;

            if status.finalized {
                return Ok(());
            }

            tokio::time::sleep(FINALITY_POLL_INTERVAL).await;
        }
    }
}
