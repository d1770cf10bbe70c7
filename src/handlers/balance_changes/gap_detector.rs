//! Gap Detection Service
//!
//! Walks the sorted ledger entries of an account and reports where the
//! balance chain is broken:
//! - internal gaps: `balanceAfter` of one entry disagrees with the
//!   `balanceBefore` of the next for a key both assert
//! - gap to creation: the earliest entry does not start from the zero snapshot
//! - gap to present: the latest entry's `balanceAfter` no longer matches the
//!   chain tip (only checked when the caller asks, since it costs RPC)
//!
//! Synthetic staking entries are excluded: reward accrual legitimately moves
//! the pool balance between any two blocks in different epochs.

use super::balance::BalanceOracle;
use super::ledger::{AccountHistory, LedgerEntry, VerificationError, verify_connectivity};
use super::snapshot::TokenKeyset;
use crate::rpc::RpcError;

/// A break in the balance chain between two recorded entries
#[derive(Debug, Clone)]
pub struct LedgerGap {
    /// Block of the earlier entry (its `balanceAfter` is trusted)
    pub start_block: u64,
    /// Block of the later entry (its `balanceBefore` disagrees)
    pub end_block: u64,
    /// The exact asset keys that disagree, used to widen the search keyset
    pub mismatched: MismatchedKeys,
}

/// Asset keys named by connectivity errors
#[derive(Debug, Clone, Default)]
pub struct MismatchedKeys {
    pub native: bool,
    pub ft_contracts: Vec<String>,
    pub intents_tokens: Vec<String>,
    pub staking_pools: Vec<String>,
}

impl MismatchedKeys {
    pub fn from_errors(errors: &[VerificationError]) -> Self {
        let mut keys = MismatchedKeys::default();
        for error in errors {
            match error {
                VerificationError::NativeBalanceMismatch { .. } => keys.native = true,
                VerificationError::TokenBalanceMismatch { token, .. } => {
                    keys.ft_contracts.push(token.clone());
                }
                VerificationError::IntentsBalanceMismatch { token, .. } => {
                    keys.intents_tokens.push(token.clone());
                }
                VerificationError::StakingBalanceMismatch { pool, .. } => {
                    keys.staking_pools.push(pool.clone());
                }
            }
        }
        keys
    }

    /// Fold the mismatched keys into a search keyset
    pub fn widen(&self, keyset: &mut TokenKeyset) {
        if self.native {
            keyset.native = true;
        }
        for contract in &self.ft_contracts {
            keyset.add_ft(contract);
        }
        for token_id in &self.intents_tokens {
            keyset.add_intents(token_id);
        }
        for pool in &self.staking_pools {
            keyset.add_pool(pool);
        }
    }
}

/// Find every adjacent-entry mismatch among the non-synthetic entries
pub fn find_internal_gaps(history: &AccountHistory) -> Vec<LedgerGap> {
    let dense: Vec<&LedgerEntry> = history
        .transactions
        .iter()
        .filter(|e| !e.is_synthetic())
        .collect();

    let mut gaps = Vec::new();

    for pair in dense.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let result = verify_connectivity(prev, next);
        if !result.verified {
            gaps.push(LedgerGap {
                start_block: prev.block,
                end_block: next.block,
                mismatched: MismatchedKeys::from_errors(&result.errors),
            });
        }
    }

    gaps
}

/// True when the earliest entry does not start from the account-creation
/// origin (the zero snapshot)
pub fn has_gap_to_creation(history: &AccountHistory) -> bool {
    history
        .transactions
        .first()
        .map(|e| !e.balance_before.is_zero_origin())
        .unwrap_or(false)
}

/// Check whether the latest entry's `balanceAfter` still matches the chain
/// at `tip_block` under the given keyset. Returns the gap range to search
/// when it does not.
pub async fn find_gap_to_present(
    oracle: &BalanceOracle,
    account_id: &str,
    keyset: &TokenKeyset,
    history: &AccountHistory,
    tip_block: u64,
) -> Result<Option<(u64, u64)>, RpcError> {
    let Some(latest) = history.transactions.last() else {
        return Ok(None);
    };
    if latest.block >= tip_block {
        return Ok(None);
    }

    let tip_snapshot = oracle
        .snapshot_at_block(account_id, tip_block, keyset)
        .await?;
    let latest_snapshot = oracle
        .snapshot_at_block(account_id, latest.block, keyset)
        .await?;

    if tip_snapshot.same_balances(&latest_snapshot) {
        Ok(None)
    } else {
        Ok(Some((latest.block + 1, tip_block)))
    }
}
