//! Balance Oracle
//!
//! Unified interface for taking multi-asset balance snapshots at specific
//! block heights. Covers four asset classes:
//! - NEAR native tokens (via `near` submodule)
//! - Fungible Tokens / NEP-141 (via `ft` submodule)
//! - NEAR Intents multi-tokens / NEP-245 (via `intents` submodule)
//! - Delegated stake in validator pools (via `staking` submodule)
//!
//! Snapshots are memoized in a bounded cache keyed by
//! `(account, block, keyset fingerprint)`, so the bisection search pays for
//! each distinct block at most once. Cache hits are free against the RPC
//! pacing budget. The cache is flushed every K discovered entries to bound
//! memory over long sync runs.

pub mod ft;
pub mod intents;
pub mod near;
pub mod staking;

use moka::future::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::handlers::balance_changes::snapshot::{BalanceSnapshot, TokenKeyset};
use crate::rpc::{RpcError, RpcGateway};

/// How many discovered entries between cache flushes
const DEFAULT_FLUSH_EVERY: usize = 10;

/// Maximum number of cached snapshots across all accounts
const CACHE_CAPACITY: u64 = 10_000;

pub struct BalanceOracle {
    gateway: Arc<RpcGateway>,
    cache: Cache<String, BalanceSnapshot>,
    entries_since_flush: AtomicUsize,
    flush_every: usize,
}

impl BalanceOracle {
    pub fn new(gateway: Arc<RpcGateway>) -> Self {
        Self::with_flush_interval(gateway, DEFAULT_FLUSH_EVERY)
    }

    pub fn with_flush_interval(gateway: Arc<RpcGateway>, flush_every: usize) -> Self {
        Self {
            gateway,
            cache: Cache::builder().max_capacity(CACHE_CAPACITY).build(),
            entries_since_flush: AtomicUsize::new(0),
            flush_every: flush_every.max(1),
        }
    }

    pub fn gateway(&self) -> &RpcGateway {
        &self.gateway
    }

    /// Take a snapshot of the requested asset keys at `block_height`.
    ///
    /// Asset classes not named by the keyset stay absent (sparse) in the
    /// result. Block 0 and below the genesis of the account resolve to dense
    /// zeros through the per-asset queries, so ranges crossing account
    /// creation remain comparable.
    pub async fn snapshot_at_block(
        &self,
        account_id: &str,
        block_height: u64,
        keyset: &TokenKeyset,
    ) -> Result<BalanceSnapshot, RpcError> {
        let cache_key = format!("{}:{}:{}", account_id, block_height, keyset.fingerprint());

        if let Some(snapshot) = self.cache.get(&cache_key).await {
            return Ok(snapshot);
        }

        let snapshot = self.query_snapshot(account_id, block_height, keyset).await?;
        self.cache.insert(cache_key, snapshot.clone()).await;

        Ok(snapshot)
    }

    async fn query_snapshot(
        &self,
        account_id: &str,
        block_height: u64,
        keyset: &TokenKeyset,
    ) -> Result<BalanceSnapshot, RpcError> {
        let native = if keyset.native {
            Some(near::get_balance_at_block(&self.gateway, account_id, block_height).await?)
        } else {
            None
        };

        let mut fungible_tokens = BTreeMap::new();
        for contract in &keyset.ft_contracts {
            let balance =
                ft::get_balance_at_block(&self.gateway, account_id, contract, block_height).await?;
            fungible_tokens.insert(contract.clone(), balance);
        }

        let intents_tokens = intents::get_batch_balances_at_block(
            &self.gateway,
            account_id,
            &keyset.intents_tokens,
            block_height,
        )
        .await?;

        let mut staking_pools = BTreeMap::new();
        for pool in &keyset.staking_pools {
            let balance =
                staking::get_balance_at_block(&self.gateway, account_id, pool, block_height)
                    .await?;
            staking_pools.insert(pool.clone(), balance);
        }

        Ok(BalanceSnapshot {
            native,
            fungible_tokens,
            intents_tokens,
            staking_pools,
        })
    }

    /// Called by the pipeline after each inserted ledger entry. Every
    /// `flush_every` entries the snapshot cache is invalidated wholesale to
    /// bound memory across long backfills.
    pub fn note_entry_discovered(&self) {
        let count = self.entries_since_flush.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.flush_every {
            self.entries_since_flush.store(0, Ordering::Relaxed);
            self.cache.invalidate_all();
            log::debug!("Snapshot cache flushed after {} discovered entries", count);
        }
    }
}
