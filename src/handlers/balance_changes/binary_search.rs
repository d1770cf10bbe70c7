//! Binary Search for Balance Changes
//!
//! Locates the exact blocks where any tracked balance changed, using range
//! bisection over archival snapshots. One snapshot covers every asset class
//! in the active keyset, so a single search pass finds native, FT, intents
//! and staking movements together.
//!
//! The search keeps the right endpoint fixed: at each level it compares the
//! midpoint snapshot against the snapshot at the end of the range. If they
//! differ, the latest change lies strictly after the midpoint; otherwise it
//! lies at or before it. This converges on the LATEST change in the range,
//! and the caller re-runs with `end = block - 1` to enumerate earlier ones,
//! so adjacent-block changes are never skipped.

use super::balance::BalanceOracle;
use super::snapshot::{BalanceSnapshot, EntryChanges, TokenKeyset};
use crate::rpc::RpcError;

/// A balance change located by the bisection search
#[derive(Debug, Clone)]
pub struct LocatedChange {
    /// The block at which the snapshot differs from the block before it
    pub block: u64,
    /// Snapshot at `block - 1`, under the search keyset
    pub balance_before: BalanceSnapshot,
    /// Snapshot at `block`, under the search keyset
    pub balance_after: BalanceSnapshot,
    /// Per-key diff between the two snapshots
    pub changes: EntryChanges,
}

/// Find the latest block in `[start_block, end_block]` at which any tracked
/// balance differs from the block before it.
///
/// Returns `None` when `snapshot(start_block - 1) == snapshot(end_block)`
/// under the given keyset. Snapshots below block 1 are the empty-account
/// zeros, so ranges starting at account creation are well-defined.
pub async fn find_latest_change(
    oracle: &BalanceOracle,
    account_id: &str,
    keyset: &TokenKeyset,
    start_block: u64,
    end_block: u64,
) -> Result<Option<LocatedChange>, RpcError> {
    if start_block > end_block || start_block == 0 {
        return Ok(None);
    }

    let left_snapshot = oracle
        .snapshot_at_block(account_id, start_block - 1, keyset)
        .await?;
    let right_snapshot = oracle
        .snapshot_at_block(account_id, end_block, keyset)
        .await?;

    if left_snapshot.same_balances(&right_snapshot) {
        return Ok(None);
    }

    // Invariant: snapshot(lo - 1) != right_snapshot == snapshot(hi)
    let mut lo = start_block;
    let mut hi = end_block;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_snapshot = oracle.snapshot_at_block(account_id, mid, keyset).await?;

        if mid_snapshot.same_balances(&right_snapshot) {
            // The latest change is at or before mid
            hi = mid;
        } else {
            // The latest change is after mid
            lo = mid + 1;
        }
    }

    let block = lo;
    let balance_before = oracle.snapshot_at_block(account_id, block - 1, keyset).await?;
    let balance_after = oracle.snapshot_at_block(account_id, block, keyset).await?;
    let changes = balance_before.diff(&balance_after);

    if changes.is_empty() {
        // The snapshots differ only in key presence; the caller widens the
        // keyset and retries rather than recording an unexplained change.
        log::warn!(
            "Located block {} for {} has no dense diff under the active keyset",
            block,
            account_id
        );
        return Ok(None);
    }

    log::debug!(
        "Located balance change for {} at block {} in range [{}, {}]",
        account_id,
        block,
        start_block,
        end_block
    );

    Ok(Some(LocatedChange {
        block,
        balance_before,
        balance_after,
        changes,
    }))
}

/// Enumerate every change block in `[start_block, end_block]`, latest first.
///
/// Drives `find_latest_change` with `end = block - 1` after each hit, so
/// changes in adjacent blocks are all discovered. Stops after `limit` hits;
/// the next pass resumes from where this one left off.
pub async fn collect_changes(
    oracle: &BalanceOracle,
    account_id: &str,
    keyset: &TokenKeyset,
    start_block: u64,
    end_block: u64,
    limit: usize,
) -> Result<Vec<LocatedChange>, RpcError> {
    let mut located = Vec::new();
    let mut end = end_block;

    while located.len() < limit && end >= start_block {
        match find_latest_change(oracle, account_id, keyset, start_block, end).await? {
            Some(change) => {
                end = change.block.saturating_sub(1);
                located.push(change);
            }
            None => break,
        }
    }

    Ok(located)
}
