//! Gap Filler Service
//!
//! Turns located balance changes into ledger entries and repairs broken
//! stretches of the balance chain.
//!
//! `record_located_change` is the shared tail of every pipeline (forward
//! pass, backward pass, gap repair): it attributes the change, widens the
//! token keyset when the currently-known keys cannot explain it, emits
//! synthetic entries for staking-only accrual, and inserts the result into
//! the account history.
//!
//! `fill_gaps` runs targeted searches bounded to each detected gap, using a
//! keyset widened by exactly the asset keys that mismatched, until the chain
//! verifies or no further change can be found.

use super::attribution::{self, AttributedChange};
use super::balance::BalanceOracle;
use super::binary_search::{self, LocatedChange};
use super::block_info::BlockTimestampCache;
use super::gap_detector;
use super::ledger::{AccountHistory, LedgerEntry, LedgerStore};
use super::snapshot::TokenKeyset;
use super::token_discovery;
use crate::constants::MAX_ATTRIBUTION_WIDENINGS;

/// Error type for gap filler operations
pub type GapFillerError = Box<dyn std::error::Error + Send + Sync>;

/// How many detect-and-fill rounds one repair pass may take
const MAX_FILL_ROUNDS: usize = 10;

/// What became of one located change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Entry inserted with at least one signer transaction
    Inserted(u64),
    /// Synthetic staking-reward entry inserted (no transaction exists)
    Synthetic(u64),
    /// An entry for this block already existed
    AlreadyPresent(u64),
    /// No attribution after the widening budget; recorded and skipped
    Unattributable(u64),
}

impl RecordOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_) | RecordOutcome::Synthetic(_))
    }
}

/// Attribute a located change and insert the resulting entry.
///
/// When attribution finds no signer transaction and the change is not
/// staking-only, the keyset is widened from the receipts observed at the
/// change block and the diff re-taken, up to three times. A change that
/// stays unexplained is recorded as a diagnostic and skipped; nothing is
/// invented.
pub async fn record_located_change(
    oracle: &BalanceOracle,
    store: &LedgerStore,
    history: &mut AccountHistory,
    keyset: &mut TokenKeyset,
    located: LocatedChange,
    ts_cache: Option<&BlockTimestampCache>,
) -> Result<RecordOutcome, GapFillerError> {
    let account_id = history.account_id.clone();
    let block = located.block;
    let mut located = located;

    for attempt in 0..=MAX_ATTRIBUTION_WIDENINGS {
        let attributed =
            attribution::attribute_change(oracle.gateway(), &account_id, &located, ts_cache)
                .await?;

        // Keys seen in this block's receipts feed future searches either way
        let discovered =
            token_discovery::discovered_from_receipts(&attributed.receipts, &account_id);

        if !attributed.transaction_hashes.is_empty() {
            token_discovery::widen_keyset(keyset, &discovered);
            let entry = build_entry(&located, attributed);
            return insert_entry(oracle, store, history, entry);
        }

        if located.changes.is_staking_only() {
            let entry = build_synthetic_entry(&located, &attributed);
            log::info!(
                "Synthetic staking entry at block {} for {} ({} pool(s))",
                block,
                account_id,
                located.changes.staking_changed.len()
            );
            return Ok(match insert_entry(oracle, store, history, entry)? {
                RecordOutcome::Inserted(b) => RecordOutcome::Synthetic(b),
                other => other,
            });
        }

        if attempt == MAX_ATTRIBUTION_WIDENINGS {
            break;
        }

        // Widen and re-diff; stop early when the receipts offered nothing new
        if !token_discovery::widen_keyset(keyset, &discovered) {
            break;
        }

        log::info!(
            "Widening keyset for {} at block {} (attempt {}/{})",
            account_id,
            block,
            attempt + 1,
            MAX_ATTRIBUTION_WIDENINGS
        );

        let balance_before = oracle
            .snapshot_at_block(&account_id, block - 1, keyset)
            .await?;
        let balance_after = oracle.snapshot_at_block(&account_id, block, keyset).await?;
        let changes = balance_before.diff(&balance_after);

        if changes.is_empty() {
            break;
        }

        located = LocatedChange {
            block,
            balance_before,
            balance_after,
            changes,
        };
    }

    log::warn!(
        "Unattributable balance change at block {} for {}; advancing past it",
        block,
        account_id
    );
    Ok(RecordOutcome::Unattributable(block))
}

/// Insert and persist immediately: each recorded entry is atomic on disk, so
/// a timed-out or cancelled pipeline keeps everything it already found.
fn insert_entry(
    oracle: &BalanceOracle,
    store: &LedgerStore,
    history: &mut AccountHistory,
    entry: LedgerEntry,
) -> Result<RecordOutcome, GapFillerError> {
    let block = entry.block;
    if store.insert(history, entry) {
        oracle.note_entry_discovered();
        store.save(history)?;
        Ok(RecordOutcome::Inserted(block))
    } else {
        Ok(RecordOutcome::AlreadyPresent(block))
    }
}

fn build_entry(located: &LocatedChange, attributed: AttributedChange) -> LedgerEntry {
    LedgerEntry {
        block: located.block,
        transaction_block: attributed.transaction_block,
        timestamp: attributed.block_timestamp,
        transaction_hashes: attributed.transaction_hashes,
        transfers: attributed.transfers,
        balance_before: located.balance_before.restricted_to(&located.changes),
        balance_after: located.balance_after.restricted_to(&located.changes),
        changes: located.changes.clone(),
        verification_with_prev: None,
        verification_with_next: None,
    }
}

fn build_synthetic_entry(located: &LocatedChange, attributed: &AttributedChange) -> LedgerEntry {
    LedgerEntry {
        block: located.block,
        transaction_block: located.block,
        timestamp: attributed.block_timestamp,
        transaction_hashes: Vec::new(),
        transfers: attribution::staking_reward_transfers(located),
        balance_before: located.balance_before.restricted_to(&located.changes),
        balance_after: located.balance_after.restricted_to(&located.changes),
        changes: located.changes.clone(),
        verification_with_prev: None,
        verification_with_next: None,
    }
}

/// Repair every internal gap in the history.
///
/// For each gap, searches `[prev.block + 1, next.block - 1]` with the active
/// keyset widened by the exact keys that mismatched. Inserted entries
/// re-verify against both neighbors through the store; the loop repeats
/// until the chain is connected, nothing more can be found, or the round
/// budget runs out.
pub async fn fill_gaps(
    oracle: &BalanceOracle,
    store: &LedgerStore,
    history: &mut AccountHistory,
    active_keyset: &mut TokenKeyset,
    ts_cache: Option<&BlockTimestampCache>,
) -> Result<usize, GapFillerError> {
    let account_id = history.account_id.clone();
    let mut filled = 0;

    for _round in 0..MAX_FILL_ROUNDS {
        let gaps = gap_detector::find_internal_gaps(history);
        if gaps.is_empty() {
            break;
        }

        let mut progressed = false;

        for gap in &gaps {
            if gap.end_block <= gap.start_block + 1 {
                log::warn!(
                    "Gap between adjacent blocks {} and {} for {} cannot be searched",
                    gap.start_block,
                    gap.end_block,
                    account_id
                );
                continue;
            }

            let mut keyset = active_keyset.clone();
            gap.mismatched.widen(&mut keyset);

            let located = binary_search::find_latest_change(
                oracle,
                &account_id,
                &keyset,
                gap.start_block + 1,
                gap.end_block - 1,
            )
            .await?;

            let Some(located) = located else {
                log::warn!(
                    "No balance change found inside gap [{}, {}] for {}; keys may disagree at the boundary",
                    gap.start_block,
                    gap.end_block,
                    account_id
                );
                continue;
            };

            let outcome = record_located_change(
                oracle,
                store,
                history,
                active_keyset,
                located,
                ts_cache,
            )
            .await?;

            if outcome.inserted() {
                log::info!(
                    "Filled gap [{}, {}] for {} with entry at {:?}",
                    gap.start_block,
                    gap.end_block,
                    account_id,
                    outcome
                );
                filled += 1;
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    Ok(filled)
}
