//! Ledger Store
//!
//! Owns the per-account append-only history. One JSON document per account,
//! entries ordered by block and unique per block, with adjacent entries
//! balance-connected: the `balanceAfter` of entry n equals the
//! `balanceBefore` of entry n+1 for every asset key both entries assert.
//!
//! Synthetic entries (staking-reward accrual with no transaction) are
//! excluded from connectivity checks: stake grows between any two blocks in
//! different epochs, so adjacent staking snapshots legitimately disagree.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::snapshot::{BalanceSnapshot, EntryChanges};
use crate::handlers::balance_changes::balance::BalanceOracle;
use crate::handlers::balance_changes::snapshot::TokenKeyset;
use crate::rpc::RpcError;

/// Classification of one attributed movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Native,
    Ft,
    Mt,
    StakingReward,
    StakingDeposit,
    StakingWithdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    In,
    Out,
}

/// One movement attributed to a balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    pub direction: TransferDirection,
    pub counterparty: String,
    /// Asset identifier; omitted for native transfers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Positive amount in the token's smallest unit
    pub amount: BigDecimal,
    /// Free-form tag, e.g. the method name that triggered the movement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Typed connectivity violation between two adjacent entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationError {
    NativeBalanceMismatch {
        expected: BigDecimal,
        actual: BigDecimal,
    },
    TokenBalanceMismatch {
        token: String,
        expected: BigDecimal,
        actual: BigDecimal,
    },
    IntentsBalanceMismatch {
        token: String,
        expected: BigDecimal,
        actual: BigDecimal,
    },
    StakingBalanceMismatch {
        pool: String,
        expected: BigDecimal,
        actual: BigDecimal,
    },
}

/// Result of an adjacent-entry connectivity check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<VerificationError>,
}

/// One observed balance change in the account's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// The block at which balances differ from the block before
    pub block: u64,
    /// The earlier block containing the signer transaction; equals `block`
    /// unless the change came from a cross-contract receipt
    pub transaction_block: u64,
    /// Block timestamp in nanoseconds
    pub timestamp: i64,
    /// Signer transaction hashes; empty only for synthetic entries
    #[serde(default)]
    pub transaction_hashes: Vec<String>,
    #[serde(default)]
    pub transfers: Vec<TransferRecord>,
    /// Snapshot at `block - 1`, restricted to the asset classes this entry concerns
    pub balance_before: BalanceSnapshot,
    /// Snapshot at `block`, same restriction
    pub balance_after: BalanceSnapshot,
    pub changes: EntryChanges,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_with_prev: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_with_next: Option<VerificationResult>,
}

impl LedgerEntry {
    /// Synthetic entries carry staking-reward accrual with no transaction
    pub fn is_synthetic(&self) -> bool {
        self.transaction_hashes.is_empty() && self.changes.is_staking_only()
    }
}

/// Rolling metadata over the history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetadata {
    pub first_block: Option<u64>,
    pub last_block: Option<u64>,
    pub total_transactions: usize,
    /// True iff the earliest entry's `balanceBefore` is the zero snapshot
    /// (the account-creation origin has been reached)
    pub history_complete: bool,
}

/// The append-only ledger for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistory {
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub transactions: Vec<LedgerEntry>,
    #[serde(default)]
    pub metadata: HistoryMetadata,
}

impl AccountHistory {
    pub fn new(account_id: &str) -> Self {
        let now = Utc::now();
        Self {
            account_id: account_id.to_string(),
            created_at: now,
            updated_at: now,
            transactions: Vec::new(),
            metadata: HistoryMetadata::default(),
        }
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Io(std::io::Error),
    /// The existing file could not be parsed. The store refuses to overwrite
    /// it; the operator has to inspect or move it aside.
    Malformed {
        path: PathBuf,
        message: String,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Io(e) => write!(f, "Ledger I/O error: {}", e),
            LedgerError::Malformed { path, message } => {
                write!(f, "Malformed ledger file {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Io(e)
    }
}

/// File-backed store for per-account histories
pub struct LedgerStore {
    data_dir: PathBuf,
}

impl LedgerStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// NEAR account ids are limited to lowercase alphanumerics, `.`, `-` and
    /// `_`, so they are safe as file names directly.
    pub fn path_for(&self, account_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", account_id))
    }

    /// Load an account's history, or a fresh empty one when no file exists
    pub fn load(&self, account_id: &str) -> Result<AccountHistory, LedgerError> {
        let path = self.path_for(account_id);

        if !path.exists() {
            return Ok(AccountHistory::new(account_id));
        }

        let contents = fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|e| LedgerError::Malformed {
            path,
            message: e.to_string(),
        })
    }

    /// Atomic whole-file rewrite: write to a temp file, then rename over the
    /// target so a crash never leaves a half-written ledger.
    pub fn save(&self, history: &AccountHistory) -> Result<(), LedgerError> {
        let path = self.path_for(&history.account_id);
        let tmp_path = path.with_extension("json.tmp");

        let contents = serde_json::to_string_pretty(history).map_err(|e| LedgerError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;

        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &path)?;

        log::debug!(
            "Saved ledger for {} ({} entries)",
            history.account_id,
            history.transactions.len()
        );

        Ok(())
    }

    /// Insert an entry, idempotent on block. Keeps the ordering invariant,
    /// recomputes metadata and both neighbors' verification results. Returns
    /// false when an entry for that block already exists.
    pub fn insert(&self, history: &mut AccountHistory, entry: LedgerEntry) -> bool {
        match history
            .transactions
            .binary_search_by_key(&entry.block, |e| e.block)
        {
            Ok(_) => {
                log::debug!(
                    "Entry at block {} already present for {}, skipping",
                    entry.block,
                    history.account_id
                );
                false
            }
            Err(pos) => {
                history.transactions.insert(pos, entry);
                history.updated_at = Utc::now();
                recompute(history);
                true
            }
        }
    }
}

/// Compare the dense intersection of `prev.balanceAfter` and
/// `entry.balanceBefore` per asset. Keys asserted by only one side carry no
/// assertion (sparse semantics).
pub fn verify_connectivity(prev: &LedgerEntry, entry: &LedgerEntry) -> VerificationResult {
    let mut errors = Vec::new();

    if let (Some(expected), Some(actual)) =
        (&prev.balance_after.native, &entry.balance_before.native)
        && expected != actual
    {
        errors.push(VerificationError::NativeBalanceMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        });
    }

    for (token, expected) in &prev.balance_after.fungible_tokens {
        if let Some(actual) = entry.balance_before.fungible_tokens.get(token)
            && expected != actual
        {
            errors.push(VerificationError::TokenBalanceMismatch {
                token: token.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    for (token, expected) in &prev.balance_after.intents_tokens {
        if let Some(actual) = entry.balance_before.intents_tokens.get(token)
            && expected != actual
        {
            errors.push(VerificationError::IntentsBalanceMismatch {
                token: token.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    for (pool, expected) in &prev.balance_after.staking_pools {
        if let Some(actual) = entry.balance_before.staking_pools.get(pool)
            && expected != actual
        {
            errors.push(VerificationError::StakingBalanceMismatch {
                pool: pool.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    VerificationResult {
        verified: errors.is_empty(),
        errors,
    }
}

/// Recompute metadata and all adjacent-entry verification results.
///
/// Connectivity is checked between consecutive NON-synthetic entries;
/// synthetic entries in between are skipped and carry no verification of
/// their own.
pub fn recompute(history: &mut AccountHistory) {
    history.transactions.sort_by_key(|e| e.block);

    history.metadata.first_block = history.transactions.first().map(|e| e.block);
    history.metadata.last_block = history.transactions.last().map(|e| e.block);
    history.metadata.total_transactions = history.transactions.len();
    history.metadata.history_complete = history
        .transactions
        .first()
        .map(|e| e.balance_before.is_zero_origin())
        .unwrap_or(false);

    for entry in &mut history.transactions {
        entry.verification_with_prev = None;
        entry.verification_with_next = None;
    }

    let dense_indices: Vec<usize> = history
        .transactions
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_synthetic())
        .map(|(i, _)| i)
        .collect();

    for pair in dense_indices.windows(2) {
        let (prev_idx, next_idx) = (pair[0], pair[1]);
        let result = verify_connectivity(
            &history.transactions[prev_idx],
            &history.transactions[next_idx],
        );

        if !result.verified {
            log::warn!(
                "Connectivity mismatch for {} between blocks {} and {}: {} error(s)",
                history.account_id,
                history.transactions[prev_idx].block,
                history.transactions[next_idx].block,
                result.errors.len()
            );
        }

        history.transactions[prev_idx].verification_with_next = Some(result.clone());
        history.transactions[next_idx].verification_with_prev = Some(result);
    }
}

/// Fill sparse snapshot fields on recent entries whose transfers imply they
/// should be dense.
///
/// An entry that records e.g. an FT transfer but only carries the native
/// balances (because the keyset was narrower when it was first observed) is
/// re-queried at `block - 1` and `block` for the missing keys. Processes up
/// to `batch_size` entries, most recent first; returns how many entries were
/// enriched.
pub async fn re_enrich(
    oracle: &BalanceOracle,
    history: &mut AccountHistory,
    batch_size: usize,
) -> Result<usize, RpcError> {
    let account_id = history.account_id.clone();
    let mut enriched = 0;

    for idx in (0..history.transactions.len()).rev() {
        if enriched >= batch_size {
            break;
        }

        let missing = missing_keyset(&history.transactions[idx]);
        if missing.is_empty() {
            continue;
        }

        let block = history.transactions[idx].block;
        let before = oracle
            .snapshot_at_block(&account_id, block.saturating_sub(1), &missing)
            .await?;
        let after = oracle.snapshot_at_block(&account_id, block, &missing).await?;

        let entry = &mut history.transactions[idx];
        merge_snapshot(&mut entry.balance_before, before);
        merge_snapshot(&mut entry.balance_after, after);
        enriched += 1;

        log::info!(
            "Re-enriched entry at block {} for {} with {} missing asset key(s)",
            block,
            account_id,
            missing.ft_contracts.len() + missing.intents_tokens.len() + missing.staking_pools.len()
        );
    }

    if enriched > 0 {
        history.updated_at = Utc::now();
        recompute(history);
    }

    Ok(enriched)
}

/// Asset keys referenced by an entry's transfers but absent from its snapshots
fn missing_keyset(entry: &LedgerEntry) -> TokenKeyset {
    let mut keyset = TokenKeyset::default();

    for transfer in &entry.transfers {
        let Some(token_id) = &transfer.token_id else {
            continue;
        };
        match transfer.transfer_type {
            TransferType::Ft => {
                if !entry.balance_after.fungible_tokens.contains_key(token_id) {
                    keyset.add_ft(token_id);
                }
            }
            TransferType::Mt => {
                if !entry.balance_after.intents_tokens.contains_key(token_id) {
                    keyset.add_intents(token_id);
                }
            }
            TransferType::StakingReward
            | TransferType::StakingDeposit
            | TransferType::StakingWithdraw => {
                if !entry.balance_after.staking_pools.contains_key(token_id) {
                    keyset.add_pool(token_id);
                }
            }
            TransferType::Native => {}
        }
    }

    keyset
}

fn merge_snapshot(target: &mut BalanceSnapshot, fresh: BalanceSnapshot) {
    if target.native.is_none() {
        target.native = fresh.native;
    }
    for (key, value) in fresh.fungible_tokens {
        target.fungible_tokens.entry(key).or_insert(value);
    }
    for (key, value) in fresh.intents_tokens {
        target.intents_tokens.entry(key).or_insert(value);
    }
    for (key, value) in fresh.staking_pools {
        target.staking_pools.entry(key).or_insert(value);
    }
}
