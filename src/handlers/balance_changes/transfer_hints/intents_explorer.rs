//! Intents Explorer API Provider
//!
//! Reports NEP-245 swaps referencing the account as recipient, via the
//! intents explorer's paginated transactions endpoint. The API is bearer
//! token authenticated and rate limited to roughly one request per five
//! seconds, so the provider paces itself and returns what it has rather
//! than hammering the endpoint.
//!
//! # API Endpoint
//! `GET {base_url}/transactions?recipient={account}&page={n}`

use super::{ActivityHint, ActivityHintProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};

/// Minimum spacing between requests to the explorer
const REQUEST_INTERVAL: Duration = Duration::from_secs(5);

/// Pagination safety bound; at one request per five seconds more pages are
/// not worth the wait for a hint source
const MAX_PAGES: usize = 3;

pub struct IntentsExplorerProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    last_request: Mutex<Option<Instant>>,
}

impl IntentsExplorerProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            last_request: Mutex::new(None),
        }
    }

    async fn pace(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < REQUEST_INTERVAL {
                sleep(REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    #[serde(default)]
    transactions: Vec<ExplorerTransaction>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ExplorerTransaction {
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    token_in: Option<String>,
    #[serde(default)]
    token_out: Option<String>,
    #[serde(default)]
    sender: Option<String>,
}

#[async_trait]
impl ActivityHintProvider for IntentsExplorerProvider {
    fn name(&self) -> &'static str {
        "IntentsExplorer"
    }

    async fn recent_activity(
        &self,
        account_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ActivityHint>, Box<dyn Error + Send + Sync>> {
        let mut hints = Vec::new();

        for page in 0..MAX_PAGES {
            self.pace().await;

            let url = format!(
                "{}/transactions?recipient={}&page={}",
                self.base_url.trim_end_matches('/'),
                account_id,
                page
            );

            let mut request = self.client.get(&url);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            let response = request.send().await?;

            if response.status().as_u16() == 429 {
                log::warn!("Intents explorer rate limited; returning partial hints");
                break;
            }
            if !response.status().is_success() {
                let status = response.status();
                return Err(format!("Intents explorer API error: {}", status).into());
            }

            let body: ExplorerResponse = response.json().await?;
            let mut page_had_hits = false;

            for tx in body.transactions {
                let Some(block_height) = tx.block_height else {
                    continue;
                };
                if block_height < from_block || block_height > to_block {
                    continue;
                }
                page_had_hits = true;

                for token_id in [&tx.token_in, &tx.token_out].into_iter().flatten() {
                    hints.push(ActivityHint {
                        block_height,
                        token_id: Some(token_id.clone()),
                        transaction_hash: tx.transaction_hash.clone(),
                        counterparty: tx.sender.clone(),
                    });
                }
            }

            if !body.has_more || !page_had_hits {
                break;
            }
        }

        hints.sort_by_key(|h| h.block_height);
        Ok(hints)
    }
}
