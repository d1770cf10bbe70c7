//! Transaction Attribution
//!
//! Maps a located balance-change block to the signer transaction(s) that
//! caused it, and explains the change as transfer records.
//!
//! Receipt execution happens in a different chunk (and often a later block)
//! than the transaction that spawned it, so attribution walks backward:
//! receipts observed in the change block are matched against candidate
//! transactions in the preceding blocks by comparing receipt ids against
//! each candidate's execution outcomes.
//!
//! Receipt selection is keyed by the located diff, not just the account:
//! an incoming FT credit executes on the token contract with the payer as
//! predecessor, so the account itself appears in neither receipt field.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bigdecimal::BigDecimal;
use near_primitives::views::FinalExecutionOutcomeViewEnum;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use super::binary_search::LocatedChange;
use super::block_info::{self, BlockContents, BlockTimestampCache, ReceiptView};
use super::ledger::{TransferDirection, TransferRecord, TransferType};
use crate::constants::{INTENTS_CONTRACT, RECEIPT_WALK_DEPTH};
use crate::rpc::{RpcError, RpcGateway};

/// Attribution result for one located change
#[derive(Debug, Default)]
pub struct AttributedChange {
    /// Signer transaction hashes; empty when no transaction explains the change
    pub transaction_hashes: Vec<String>,
    /// The earliest block containing a signer transaction; equals the change
    /// block when the transaction executed there
    pub transaction_block: u64,
    /// Change block timestamp in nanoseconds
    pub block_timestamp: i64,
    pub transfers: Vec<TransferRecord>,
    /// Receipts relevant to the change, for token discovery
    pub receipts: Vec<ReceiptView>,
}

/// A signer transaction confirmed to have produced receipts at the change block
#[derive(Debug, Clone)]
struct OriginTransaction {
    hash: String,
    signer_id: String,
    receiver_id: String,
    block: u64,
    /// Logs of every receipt outcome, keyed by executor account
    outcome_logs: Vec<(String, Vec<String>)>,
}

/// Attribute a located balance change to its signer transaction(s).
///
/// The caller decides what to do when `transaction_hashes` comes back empty:
/// staking-only changes become synthetic entries, anything else is retried
/// with a widened keyset.
pub async fn attribute_change(
    gateway: &RpcGateway,
    account_id: &str,
    located: &LocatedChange,
    ts_cache: Option<&BlockTimestampCache>,
) -> Result<AttributedChange, RpcError> {
    let change_block = located.block;
    let block_timestamp = block_info::get_block_timestamp(gateway, change_block, ts_cache).await?;

    let contents = block_info::get_block_contents(gateway, change_block).await?;
    let receipts = select_relevant_receipts(&contents, account_id, located);
    let receipt_ids: HashSet<String> = receipts.iter().map(|r| r.receipt_id.to_string()).collect();
    let counterparties: HashSet<String> = receipts
        .iter()
        .flat_map(|r| {
            [
                r.predecessor_id.to_string(),
                r.receiver_id.to_string(),
            ]
        })
        .collect();

    let origins = resolve_origin_transactions(
        gateway,
        account_id,
        change_block,
        &contents,
        &receipt_ids,
        &counterparties,
    )
    .await?;

    let mut transaction_hashes: Vec<String> = Vec::new();
    let mut transaction_block = change_block;
    for origin in &origins {
        if !transaction_hashes.contains(&origin.hash) {
            transaction_hashes.push(origin.hash.clone());
        }
        transaction_block = transaction_block.min(origin.block);
    }

    let mut transfers = Vec::new();
    let mut staking_methods: HashMap<String, String> = HashMap::new();

    for receipt in &receipts {
        transfers.extend(transfers_from_receipt(
            receipt,
            account_id,
            &mut staking_methods,
        ));
    }

    for origin in &origins {
        for (executor_id, logs) in &origin.outcome_logs {
            if executor_id == INTENTS_CONTRACT {
                transfers.extend(mt_transfers_from_logs(logs, account_id));
            }
        }
    }

    // tx_status may not cover intents events when the origin sits outside the
    // walk window; the block-data archive carries the outcome logs directly
    let mt_missing = !located.changes.intents_changed.is_empty()
        && !transfers
            .iter()
            .any(|t| t.transfer_type == TransferType::Mt);
    if mt_missing && gateway.has_block_archive() {
        match gateway.fetch_archive_block(change_block).await {
            Ok(payload) => {
                let logs = block_info::archive_outcome_logs(&payload, INTENTS_CONTRACT);
                transfers.extend(mt_transfers_from_logs(&logs, account_id));
            }
            Err(e) => {
                log::debug!(
                    "Block archive lookup failed for block {}: {}",
                    change_block,
                    e
                );
            }
        }
    }

    transfers.extend(staking_transfers_from_diff(located, &staking_methods));

    if !transaction_hashes.is_empty() {
        add_fallback_transfers(&mut transfers, located, &origins, account_id);
    }

    dedupe_transfers(&mut transfers);

    if transaction_hashes.is_empty() && !located.changes.is_staking_only() {
        log::warn!(
            "No signer transaction found for change at block {} for {} ({} receipt(s) observed)",
            change_block,
            account_id,
            receipts.len()
        );
    }

    Ok(AttributedChange {
        transaction_hashes,
        transaction_block,
        block_timestamp,
        transfers,
        receipts,
    })
}

/// Build the transfer records for a staking-only synthetic entry: one inbound
/// reward per pool whose delegated balance grew without a transaction.
pub fn staking_reward_transfers(located: &LocatedChange) -> Vec<TransferRecord> {
    let zero = BigDecimal::from(0);
    located
        .changes
        .staking_changed
        .iter()
        .filter(|(_, delta)| delta.diff > zero)
        .map(|(pool, delta)| TransferRecord {
            transfer_type: TransferType::StakingReward,
            direction: TransferDirection::In,
            counterparty: pool.clone(),
            token_id: Some(pool.clone()),
            amount: delta.diff.clone(),
            memo: None,
        })
        .collect()
}

/// Receipts in the change block that can explain the located diff:
/// - receipts the account sent or received (native, staking, outgoing FT)
/// - receipts executing on an FT contract whose balance changed
/// - receipts executing on intents.near when an intents balance changed
fn select_relevant_receipts(
    contents: &BlockContents,
    account_id: &str,
    located: &LocatedChange,
) -> Vec<ReceiptView> {
    let changed_ft: HashSet<&str> = located
        .changes
        .tokens_changed
        .keys()
        .map(|k| k.as_str())
        .collect();
    let intents_changed = !located.changes.intents_changed.is_empty();

    contents
        .receipts
        .iter()
        .filter(|receipt| {
            let receiver = receipt.receiver_id.as_str();
            receipt.predecessor_id.as_str() == account_id
                || receiver == account_id
                || changed_ft.contains(receiver)
                || (intents_changed && receiver == INTENTS_CONTRACT)
        })
        .cloned()
        .collect()
}

/// Walk receipts executed at the change block back to their signer
/// transactions.
///
/// State-change causes at the change block name signer transactions directly
/// when the transaction executed there. Receipts spawned by earlier
/// transactions (cross-contract flows) are resolved by scanning candidate
/// transactions in the preceding blocks and checking whether their execution
/// outcomes contain one of the observed receipt ids.
async fn resolve_origin_transactions(
    gateway: &RpcGateway,
    account_id: &str,
    change_block: u64,
    change_contents: &BlockContents,
    receipt_ids: &HashSet<String>,
    counterparties: &HashSet<String>,
) -> Result<Vec<OriginTransaction>, RpcError> {
    let mut origins: Vec<OriginTransaction> = Vec::new();
    let mut checked_hashes: HashSet<String> = HashSet::new();
    let mut unresolved: HashSet<String> = receipt_ids.clone();

    // Direct causes at the change block: the node names the transaction
    let changes = match block_info::get_account_changes(gateway, account_id, change_block).await {
        Ok(changes) => changes,
        Err(RpcError::RateLimited(msg)) => return Err(RpcError::RateLimited(msg)),
        Err(RpcError::Cancelled) => return Err(RpcError::Cancelled),
        Err(e) => {
            log::warn!(
                "Failed to query account changes at block {}: {}",
                change_block,
                e
            );
            Vec::new()
        }
    };

    for change in &changes {
        use near_primitives::views::StateChangeCauseView;
        if let StateChangeCauseView::TransactionProcessing { tx_hash } = &change.cause {
            let hash = tx_hash.to_string();
            if checked_hashes.insert(hash.clone())
                && let Some(origin) = confirm_origin(
                    gateway,
                    &hash,
                    account_id,
                    change_block,
                    &mut unresolved,
                    true,
                )
                .await?
            {
                origins.push(origin);
            }
        }
    }

    // Scan this block and its predecessors for candidate signer transactions
    let lowest_block = change_block.saturating_sub(RECEIPT_WALK_DEPTH);
    let mut scan_block = change_block;

    while !unresolved.is_empty() && scan_block >= lowest_block && scan_block > 0 {
        let contents_storage;
        let contents = if scan_block == change_block {
            change_contents
        } else {
            match block_info::get_block_contents(gateway, scan_block).await {
                Ok(contents) => {
                    contents_storage = contents;
                    &contents_storage
                }
                Err(RpcError::RateLimited(msg)) => return Err(RpcError::RateLimited(msg)),
                Err(RpcError::Cancelled) => return Err(RpcError::Cancelled),
                Err(e) => {
                    log::debug!("Skipping block {} during receipt walk: {}", scan_block, e);
                    scan_block -= 1;
                    continue;
                }
            }
        };

        for tx in &contents.transactions {
            let signer = tx.signer_id.as_str();
            let receiver = tx.receiver_id.as_str();
            let is_candidate = signer == account_id
                || receiver == account_id
                || counterparties.contains(signer)
                || counterparties.contains(receiver);
            if !is_candidate {
                continue;
            }

            let hash = tx.hash.to_string();
            if !checked_hashes.insert(hash.clone()) {
                continue;
            }

            if let Some(origin) =
                confirm_origin(gateway, &hash, signer, scan_block, &mut unresolved, false).await?
            {
                origins.push(origin);
            }

            if unresolved.is_empty() {
                break;
            }
        }

        scan_block -= 1;
    }

    if !unresolved.is_empty() && !receipt_ids.is_empty() {
        log::debug!(
            "{} receipt(s) at block {} remain unresolved after walking {} blocks",
            unresolved.len(),
            change_block,
            RECEIPT_WALK_DEPTH
        );
    }

    Ok(origins)
}

/// Check whether a candidate transaction explains the change.
///
/// A transaction named directly by a state-change cause (`trusted`) is
/// accepted outright; a scanned candidate must have an execution outcome
/// covering one of the unresolved receipt ids. Either way, every receipt id
/// covered by the transaction's outcomes is claimed.
async fn confirm_origin(
    gateway: &RpcGateway,
    tx_hash: &str,
    signer_hint: &str,
    tx_block: u64,
    unresolved: &mut HashSet<String>,
    trusted: bool,
) -> Result<Option<OriginTransaction>, RpcError> {
    let response = match block_info::get_transaction(gateway, tx_hash, signer_hint).await {
        Ok(response) => response,
        Err(RpcError::RateLimited(msg)) => return Err(RpcError::RateLimited(msg)),
        Err(RpcError::Cancelled) => return Err(RpcError::Cancelled),
        Err(e) => {
            log::debug!("Failed to query transaction {}: {}", tx_hash, e);
            return Ok(None);
        }
    };

    let Some(final_outcome) = &response.final_execution_outcome else {
        return Ok(None);
    };

    let (receipts_outcome, transaction) = match final_outcome {
        FinalExecutionOutcomeViewEnum::FinalExecutionOutcome(outcome) => {
            (&outcome.receipts_outcome, &outcome.transaction)
        }
        FinalExecutionOutcomeViewEnum::FinalExecutionOutcomeWithReceipt(outcome) => (
            &outcome.final_outcome.receipts_outcome,
            &outcome.final_outcome.transaction,
        ),
    };

    let mut matched = trusted;
    let mut outcome_logs = Vec::new();

    for receipt_outcome in receipts_outcome {
        if unresolved.remove(&receipt_outcome.id.to_string()) {
            matched = true;
        }
        outcome_logs.push((
            receipt_outcome.outcome.executor_id.to_string(),
            receipt_outcome.outcome.logs.clone(),
        ));
    }

    if !matched {
        return Ok(None);
    }

    Ok(Some(OriginTransaction {
        hash: tx_hash.to_string(),
        signer_id: transaction.signer_id.to_string(),
        receiver_id: transaction.receiver_id.to_string(),
        block: tx_block,
        outcome_logs,
    }))
}

/// Build native and FT transfer records from the actions of one receipt, and
/// collect staking method calls for the pool-side records.
///
/// Works on the serialized action view, so base64 args decode uniformly.
fn transfers_from_receipt(
    receipt: &ReceiptView,
    account_id: &str,
    staking_methods: &mut HashMap<String, String>,
) -> Vec<TransferRecord> {
    let mut transfers = Vec::new();

    let receipt_json = match serde_json::to_value(&receipt.receipt) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Failed to serialize receipt {}: {}", receipt.receipt_id, e);
            return transfers;
        }
    };

    let Some(actions) = receipt_json
        .get("Action")
        .and_then(|a| a.get("actions"))
        .and_then(|a| a.as_array())
    else {
        return transfers;
    };

    let predecessor = receipt.predecessor_id.as_str();
    let receiver = receipt.receiver_id.as_str();
    let involves_account = predecessor == account_id || receiver == account_id;

    let outgoing = predecessor == account_id;
    let direction = if outgoing {
        TransferDirection::Out
    } else {
        TransferDirection::In
    };
    let counterparty = if outgoing { receiver } else { predecessor };

    for action in actions {
        if let Some(transfer) = action.get("Transfer") {
            if involves_account && let Some(amount) = parse_amount(transfer.get("deposit")) {
                transfers.push(TransferRecord {
                    transfer_type: TransferType::Native,
                    direction,
                    counterparty: counterparty.to_string(),
                    token_id: None,
                    amount,
                    memo: None,
                });
            }
            continue;
        }

        let Some(function_call) = action.get("FunctionCall") else {
            continue;
        };
        let method_name = function_call
            .get("method_name")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        let args = decode_args(function_call.get("args"));
        let deposit = parse_amount(function_call.get("deposit"));

        match method_name {
            "ft_transfer" | "ft_transfer_call" => {
                // The receipt receiver is the token contract; direction comes
                // from who sent vs who receives in the args
                if let Some(transfer) = ft_transfer_record(&args, account_id, predecessor, receiver)
                {
                    transfers.push(transfer);
                }
            }
            "deposit_and_stake" | "unstake" | "unstake_all" | "withdraw" | "withdraw_all"
                if predecessor == account_id =>
            {
                staking_methods.insert(receiver.to_string(), method_name.to_string());
                // An attached deposit still moves native tokens to the pool
                if let Some(amount) = deposit {
                    transfers.push(TransferRecord {
                        transfer_type: TransferType::Native,
                        direction: TransferDirection::Out,
                        counterparty: receiver.to_string(),
                        token_id: None,
                        amount,
                        memo: Some(method_name.to_string()),
                    });
                }
            }
            _ => {
                // Any other call with an attached deposit moves native tokens
                if involves_account && let Some(amount) = deposit {
                    transfers.push(TransferRecord {
                        transfer_type: TransferType::Native,
                        direction,
                        counterparty: counterparty.to_string(),
                        token_id: None,
                        amount,
                        memo: Some(method_name.to_string()),
                    });
                }
            }
        }
    }

    transfers
}

/// Pool-side records derived from the located staking diff. A growing
/// delegated balance is a deposit when the account called
/// `deposit_and_stake` in the change block, otherwise reward accrual; a
/// shrinking balance is a withdrawal.
fn staking_transfers_from_diff(
    located: &LocatedChange,
    staking_methods: &HashMap<String, String>,
) -> Vec<TransferRecord> {
    let zero = BigDecimal::from(0);
    let mut transfers = Vec::new();

    for (pool, delta) in &located.changes.staking_changed {
        let method = staking_methods.get(pool).map(|m| m.as_str());

        if delta.diff > zero {
            let transfer_type = if method == Some("deposit_and_stake") {
                TransferType::StakingDeposit
            } else {
                TransferType::StakingReward
            };
            transfers.push(TransferRecord {
                transfer_type,
                direction: TransferDirection::In,
                counterparty: pool.clone(),
                token_id: Some(pool.clone()),
                amount: delta.diff.clone(),
                memo: method.map(|m| m.to_string()),
            });
        } else if delta.diff < zero {
            transfers.push(TransferRecord {
                transfer_type: TransferType::StakingWithdraw,
                direction: TransferDirection::Out,
                counterparty: pool.clone(),
                token_id: Some(pool.clone()),
                amount: delta.diff.abs(),
                memo: method.map(|m| m.to_string()),
            });
        }
    }

    transfers
}

/// Ensure every changed asset key is covered by at least one transfer record.
///
/// Only applies when a signer transaction was found: an attributed diff that
/// the receipt actions could not explain (e.g. a gas refund or an event log
/// format we do not parse) still gets a record derived from the diff itself,
/// so no entry carries a change without an explanation.
fn add_fallback_transfers(
    transfers: &mut Vec<TransferRecord>,
    located: &LocatedChange,
    origins: &[OriginTransaction],
    account_id: &str,
) {
    let zero = BigDecimal::from(0);

    let tx_counterparty = origins
        .first()
        .map(|origin| {
            if origin.signer_id == account_id {
                origin.receiver_id.clone()
            } else {
                origin.signer_id.clone()
            }
        })
        .unwrap_or_else(|| account_id.to_string());

    if located.changes.native_changed
        && !transfers
            .iter()
            .any(|t| t.transfer_type == TransferType::Native)
        && let Some(diff) = &located.changes.native_diff
        && diff != &zero
    {
        transfers.push(TransferRecord {
            transfer_type: TransferType::Native,
            direction: if diff > &zero {
                TransferDirection::In
            } else {
                TransferDirection::Out
            },
            counterparty: tx_counterparty.clone(),
            token_id: None,
            amount: diff.abs(),
            memo: None,
        });
    }

    for (token, delta) in &located.changes.tokens_changed {
        let covered = transfers
            .iter()
            .any(|t| t.transfer_type == TransferType::Ft && t.token_id.as_deref() == Some(token));
        if !covered && delta.diff != zero {
            transfers.push(TransferRecord {
                transfer_type: TransferType::Ft,
                direction: if delta.diff > zero {
                    TransferDirection::In
                } else {
                    TransferDirection::Out
                },
                counterparty: tx_counterparty.clone(),
                token_id: Some(token.clone()),
                amount: delta.diff.abs(),
                memo: None,
            });
        }
    }

    for (token, delta) in &located.changes.intents_changed {
        let covered = transfers
            .iter()
            .any(|t| t.transfer_type == TransferType::Mt && t.token_id.as_deref() == Some(token));
        if !covered && delta.diff != zero {
            transfers.push(TransferRecord {
                transfer_type: TransferType::Mt,
                direction: if delta.diff > zero {
                    TransferDirection::In
                } else {
                    TransferDirection::Out
                },
                counterparty: INTENTS_CONTRACT.to_string(),
                token_id: Some(token.clone()),
                amount: delta.diff.abs(),
                memo: None,
            });
        }
    }
}

fn ft_transfer_record(
    args: &serde_json::Value,
    account_id: &str,
    predecessor: &str,
    token_contract: &str,
) -> Option<TransferRecord> {
    let args_receiver = args.get("receiver_id").and_then(|r| r.as_str())?;
    let amount = args
        .get("amount")
        .and_then(|a| a.as_str())
        .and_then(|a| BigDecimal::from_str(a).ok())?;

    if amount <= BigDecimal::from(0) {
        return None;
    }

    let memo = args
        .get("memo")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string());

    if predecessor == account_id {
        Some(TransferRecord {
            transfer_type: TransferType::Ft,
            direction: TransferDirection::Out,
            counterparty: args_receiver.to_string(),
            token_id: Some(token_contract.to_string()),
            amount,
            memo,
        })
    } else if args_receiver == account_id {
        Some(TransferRecord {
            transfer_type: TransferType::Ft,
            direction: TransferDirection::In,
            counterparty: predecessor.to_string(),
            token_id: Some(token_contract.to_string()),
            amount,
            memo,
        })
    } else {
        None
    }
}

/// NEP-245 event payload carried in EVENT_JSON logs on intents.near
#[derive(Debug, Deserialize)]
struct EventJson {
    standard: String,
    event: String,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Build MT transfer records from execution outcome logs on intents.near.
///
/// `mt_mint` credits the account, `mt_burn` debits it (counterparty defaults
/// to the intents contract), `mt_transfer` moves between owners.
pub fn mt_transfers_from_logs(logs: &[String], account_id: &str) -> Vec<TransferRecord> {
    let mut transfers = Vec::new();

    for log in logs {
        let Some(json_str) = log.strip_prefix("EVENT_JSON:") else {
            continue;
        };
        let Ok(event) = serde_json::from_str::<EventJson>(json_str) else {
            continue;
        };
        if event.standard != "nep245" {
            continue;
        }

        for item in &event.data {
            let token_ids: Vec<String> = item
                .get("token_ids")
                .and_then(|t| serde_json::from_value(t.clone()).ok())
                .unwrap_or_default();
            let amounts: Vec<String> = item
                .get("amounts")
                .and_then(|a| serde_json::from_value(a.clone()).ok())
                .unwrap_or_default();

            let (direction, counterparty) = match event.event.as_str() {
                "mt_mint" => {
                    let owner = item.get("owner_id").and_then(|o| o.as_str());
                    if owner != Some(account_id) {
                        continue;
                    }
                    (TransferDirection::In, INTENTS_CONTRACT.to_string())
                }
                "mt_burn" => {
                    let owner = item.get("owner_id").and_then(|o| o.as_str());
                    if owner != Some(account_id) {
                        continue;
                    }
                    (TransferDirection::Out, INTENTS_CONTRACT.to_string())
                }
                "mt_transfer" => {
                    let old_owner = item.get("old_owner_id").and_then(|o| o.as_str());
                    let new_owner = item.get("new_owner_id").and_then(|o| o.as_str());
                    if old_owner == Some(account_id) {
                        (
                            TransferDirection::Out,
                            new_owner.unwrap_or(INTENTS_CONTRACT).to_string(),
                        )
                    } else if new_owner == Some(account_id) {
                        (
                            TransferDirection::In,
                            old_owner.unwrap_or(INTENTS_CONTRACT).to_string(),
                        )
                    } else {
                        continue;
                    }
                }
                _ => continue,
            };

            for (token_id, amount) in token_ids.iter().zip(amounts.iter()) {
                let Ok(amount) = BigDecimal::from_str(amount) else {
                    continue;
                };
                if amount <= BigDecimal::from(0) {
                    continue;
                }
                transfers.push(TransferRecord {
                    transfer_type: TransferType::Mt,
                    direction,
                    counterparty: counterparty.clone(),
                    token_id: Some(token_id.clone()),
                    amount,
                    memo: Some(event.event.clone()),
                });
            }
        }
    }

    transfers
}

fn decode_args(args: Option<&serde_json::Value>) -> serde_json::Value {
    args.and_then(|a| a.as_str())
        .and_then(|b64| BASE64_STANDARD.decode(b64).ok())
        .and_then(|decoded| serde_json::from_slice(&decoded).ok())
        .unwrap_or(serde_json::Value::Null)
}

fn parse_amount(value: Option<&serde_json::Value>) -> Option<BigDecimal> {
    let raw = match value? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let amount = BigDecimal::from_str(&raw).ok()?;
    if amount > BigDecimal::from(0) {
        Some(amount)
    } else {
        None
    }
}

fn dedupe_transfers(transfers: &mut Vec<TransferRecord>) {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut keep = Vec::with_capacity(transfers.len());

    for transfer in transfers.drain(..) {
        let key = format!(
            "{:?}:{:?}:{}:{}:{}",
            transfer.transfer_type,
            transfer.direction,
            transfer.counterparty,
            transfer.token_id.as_deref().unwrap_or(""),
            transfer.amount
        );
        if seen.insert(key, keep.len()).is_none() {
            keep.push(transfer);
        }
    }

    *transfers = keep;
}
