//! FastNear Transfers API Provider
//!
//! Implements the ActivityHintProvider trait using FastNear's transfers-api,
//! a paginated transactions-by-account endpoint covering native and FT
//! movements.
//!
//! # API Endpoint
//! `POST {base_url}/v0/transfers`

use super::{ActivityHint, ActivityHintProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// FastNear transfers-api provider
pub struct FastNearProvider {
    client: Client,
    base_url: String,
}

impl Default for FastNearProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FastNearProvider {
    pub fn new() -> Self {
        Self::with_base_url("https://transfers.main.fastnear.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Convert block height to approximate timestamp (ms).
    ///
    /// The transfers API filters by timestamp; mainnet produces roughly one
    /// block per 616 ms around the reference point below, which is accurate
    /// enough for a hint window.
    fn block_to_timestamp_ms(block_height: u64) -> u64 {
        const REFERENCE_BLOCK: u64 = 178_148_636;
        const REFERENCE_TIMESTAMP_MS: u64 = 1_766_561_525_616;
        const MS_PER_BLOCK: u64 = 616;

        if block_height >= REFERENCE_BLOCK {
            REFERENCE_TIMESTAMP_MS + ((block_height - REFERENCE_BLOCK) * MS_PER_BLOCK)
        } else {
            REFERENCE_TIMESTAMP_MS.saturating_sub((REFERENCE_BLOCK - block_height) * MS_PER_BLOCK)
        }
    }
}

#[derive(Debug, Serialize)]
struct TransfersRequest {
    account_id: String,
    start_timestamp_ms: u64,
    end_timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransfersResponse {
    #[serde(default)]
    transfers: Vec<TransferRow>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferRow {
    block_height: u64,
    #[serde(default)]
    token_id: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    counterparty: Option<String>,
}

/// Pagination safety bound
const MAX_PAGES: usize = 10;

#[async_trait]
impl ActivityHintProvider for FastNearProvider {
    fn name(&self) -> &'static str {
        "FastNear"
    }

    async fn recent_activity(
        &self,
        account_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ActivityHint>, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/v0/transfers", self.base_url.trim_end_matches('/'));
        let mut hints = Vec::new();
        let mut cursor: Option<String> = None;

        for _page in 0..MAX_PAGES {
            let request = TransfersRequest {
                account_id: account_id.to_string(),
                start_timestamp_ms: Self::block_to_timestamp_ms(from_block),
                end_timestamp_ms: Self::block_to_timestamp_ms(to_block),
                cursor: cursor.take(),
            };

            let response = self.client.post(&url).json(&request).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(format!("FastNear API error: {} - {}", status, body).into());
            }

            let page: TransfersResponse = response.json().await?;

            for row in page.transfers {
                if row.block_height < from_block || row.block_height > to_block {
                    continue;
                }
                hints.push(ActivityHint {
                    block_height: row.block_height,
                    token_id: row.token_id,
                    transaction_hash: row.transaction_hash,
                    counterparty: row.counterparty,
                });
            }

            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }

        hints.sort_by_key(|h| h.block_height);
        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_to_timestamp_reference_point() {
        assert_eq!(
            FastNearProvider::block_to_timestamp_ms(178_148_636),
            1_766_561_525_616
        );
    }

    #[test]
    fn test_block_to_timestamp_is_monotonic() {
        let earlier = FastNearProvider::block_to_timestamp_ms(170_000_000);
        let later = FastNearProvider::block_to_timestamp_ms(180_000_000);
        assert!(earlier < later);
    }
}
