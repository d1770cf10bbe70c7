//! Activity Hint Providers
//!
//! External indexer integration for the token-set discoverer. Instead of
//! learning every asset key from receipts alone, external providers can
//! name recently-touched tokens and the blocks they moved at.
//!
//! The hint system follows a "hints, not source of truth" philosophy:
//! 1. External APIs suggest tokens and block heights
//! 2. The oracle and locator verify everything against the archival node
//! 3. Absence or failure of a provider never blocks a sync pass

pub mod fastnear;
pub mod intents_explorer;

use async_trait::async_trait;
use std::error::Error;

/// A hint about account activity from an external indexer
#[derive(Debug, Clone)]
pub struct ActivityHint {
    /// Block height where the activity occurred
    pub block_height: u64,
    /// Asset the activity touched ("near", an FT contract, an intents token
    /// id, or a staking pool), when the provider knows it
    pub token_id: Option<String>,
    /// Transaction hash, when the provider supplies one
    pub transaction_hash: Option<String>,
    /// The other party, when the provider supplies one
    pub counterparty: Option<String>,
}

/// Provider that can report recent account activity
#[async_trait]
pub trait ActivityHintProvider: Send + Sync {
    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;

    /// Get activity hints for an account in a block range
    async fn recent_activity(
        &self,
        account_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ActivityHint>, Box<dyn Error + Send + Sync>>;
}

/// Orchestrates the configured providers, merging their results
#[derive(Default)]
pub struct ActivityHintService {
    providers: Vec<Box<dyn ActivityHintProvider>>,
}

impl ActivityHintService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl ActivityHintProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Query all providers, merge results and deduplicate by
    /// (block height, token id). Provider failures are logged and skipped.
    pub async fn recent_activity(
        &self,
        account_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Vec<ActivityHint> {
        use futures::future::join_all;
        use std::collections::BTreeMap;

        if self.providers.is_empty() {
            return vec![];
        }

        let futures = self.providers.iter().map(|provider| {
            let account_id = account_id.to_string();
            async move {
                match provider
                    .recent_activity(&account_id, from_block, to_block)
                    .await
                {
                    Ok(hints) => {
                        log::debug!(
                            "Provider {} returned {} hints for {}",
                            provider.name(),
                            hints.len(),
                            account_id
                        );
                        hints
                    }
                    Err(e) => {
                        log::warn!("Provider {} failed for {}: {}", provider.name(), account_id, e);
                        vec![]
                    }
                }
            }
        });

        let results = join_all(futures).await;

        let mut hints_by_key: BTreeMap<(u64, String), ActivityHint> = BTreeMap::new();
        for hints in results {
            for hint in hints {
                let key = (
                    hint.block_height,
                    hint.token_id.clone().unwrap_or_default(),
                );
                hints_by_key.entry(key).or_insert(hint);
            }
        }

        hints_by_key.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProvider {
        name: &'static str,
        hints: Vec<ActivityHint>,
    }

    #[async_trait]
    impl ActivityHintProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn recent_activity(
            &self,
            _account_id: &str,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<ActivityHint>, Box<dyn Error + Send + Sync>> {
            Ok(self
                .hints
                .iter()
                .filter(|h| h.block_height >= from_block && h.block_height <= to_block)
                .cloned()
                .collect())
        }
    }

    fn hint(block_height: u64, token_id: &str) -> ActivityHint {
        ActivityHint {
            block_height,
            token_id: Some(token_id.to_string()),
            transaction_hash: None,
            counterparty: None,
        }
    }

    #[tokio::test]
    async fn test_empty_service_returns_nothing() {
        let service = ActivityHintService::new();
        assert!(service.recent_activity("test.near", 0, 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_hints_filtered_by_range() {
        let provider = MockProvider {
            name: "test",
            hints: vec![hint(500, "wrap.near"), hint(1500, "wrap.near")],
        };
        let service = ActivityHintService::new().with_provider(provider);

        let hints = service.recent_activity("test.near", 1000, 2000).await;
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].block_height, 1500);
    }

    #[tokio::test]
    async fn test_multiple_providers_deduplicate() {
        let provider1 = MockProvider {
            name: "provider1",
            hints: vec![hint(1500, "wrap.near"), hint(1600, "usdt.tether-token.near")],
        };
        let provider2 = MockProvider {
            name: "provider2",
            hints: vec![hint(1500, "wrap.near"), hint(1700, "wrap.near")],
        };

        let service = ActivityHintService::new()
            .with_provider(provider1)
            .with_provider(provider2);

        let hints = service.recent_activity("test.near", 1000, 2000).await;
        assert_eq!(hints.len(), 3);
        let blocks: Vec<u64> = hints.iter().map(|h| h.block_height).collect();
        assert_eq!(blocks, vec![1500, 1600, 1700]);
    }
}
