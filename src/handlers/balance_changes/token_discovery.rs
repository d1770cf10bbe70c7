//! Token Discovery Service
//!
//! Maintains the per-account active keyset: the FT contracts, intents token
//! ids and staking pools the balance oracle queries for an account. Sources,
//! in priority order: keys already present in the stored history, receipts
//! observed at change blocks, and optional external activity indexers. The
//! indexers are hints only; their absence or failure never blocks a pass.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use std::collections::HashSet;

use super::balance::staking::is_staking_pool;
use super::block_info::ReceiptView;
use super::ledger::AccountHistory;
use super::snapshot::TokenKeyset;
use super::transfer_hints::ActivityHintService;
use crate::constants::INTENTS_CONTRACT;

/// Keys discovered outside the stored history
#[derive(Debug, Default)]
pub struct DiscoveredKeys {
    pub ft_contracts: HashSet<String>,
    pub intents_tokens: HashSet<String>,
    pub staking_pools: HashSet<String>,
}

impl DiscoveredKeys {
    pub fn is_empty(&self) -> bool {
        self.ft_contracts.is_empty()
            && self.intents_tokens.is_empty()
            && self.staking_pools.is_empty()
    }

    pub fn merge(&mut self, other: DiscoveredKeys) {
        self.ft_contracts.extend(other.ft_contracts);
        self.intents_tokens.extend(other.intents_tokens);
        self.staking_pools.extend(other.staking_pools);
    }
}

/// Seed the active keyset from every asset key the stored history references
pub fn keyset_from_history(history: &AccountHistory) -> TokenKeyset {
    let mut keyset = TokenKeyset::native_only();

    for entry in &history.transactions {
        for key in entry.balance_before.fungible_tokens.keys() {
            keyset.add_ft(key);
        }
        for key in entry.balance_after.fungible_tokens.keys() {
            keyset.add_ft(key);
        }
        for key in entry.balance_before.intents_tokens.keys() {
            keyset.add_intents(key);
        }
        for key in entry.balance_after.intents_tokens.keys() {
            keyset.add_intents(key);
        }
        for key in entry.balance_before.staking_pools.keys() {
            keyset.add_pool(key);
        }
        for key in entry.balance_after.staking_pools.keys() {
            keyset.add_pool(key);
        }
        for key in entry.changes.tokens_changed.keys() {
            keyset.add_ft(key);
        }
        for key in entry.changes.intents_changed.keys() {
            keyset.add_intents(key);
        }
        for key in entry.changes.staking_changed.keys() {
            keyset.add_pool(key);
        }
    }

    keyset
}

/// Extract asset keys from receipts observed during a pass.
///
/// FT contracts come from NEP-141 method calls where the account is sender
/// or receiver of the funds; intents token ids from `mt_*` call arguments on
/// intents.near; staking pools from pool-pattern receivers the account
/// called.
pub fn discovered_from_receipts(receipts: &[ReceiptView], account_id: &str) -> DiscoveredKeys {
    let mut discovered = DiscoveredKeys::default();

    for receipt in receipts {
        let predecessor = receipt.predecessor_id.as_str();
        let receiver = receipt.receiver_id.as_str();

        let Ok(receipt_json) = serde_json::to_value(&receipt.receipt) else {
            continue;
        };
        let Some(actions) = receipt_json
            .get("Action")
            .and_then(|a| a.get("actions"))
            .and_then(|a| a.as_array())
        else {
            continue;
        };

        for action in actions {
            let Some(function_call) = action.get("FunctionCall") else {
                continue;
            };
            let method_name = function_call
                .get("method_name")
                .and_then(|m| m.as_str())
                .unwrap_or_default();

            match method_name {
                "ft_transfer" | "ft_transfer_call" | "ft_on_transfer" => {
                    // The receiver is the token contract; only track tokens
                    // the monitored account actually moved
                    let args = decode_args(function_call.get("args"));
                    let args_receiver = args.get("receiver_id").and_then(|r| r.as_str());
                    if predecessor == account_id || args_receiver == Some(account_id) {
                        discovered.ft_contracts.insert(receiver.to_string());
                    }
                }
                "mt_transfer" | "mt_batch_transfer" | "mt_transfer_call" | "mt_withdraw"
                    if receiver == INTENTS_CONTRACT =>
                {
                    let args = decode_args(function_call.get("args"));
                    if let Some(token_ids) = args.get("token_ids").and_then(|t| t.as_array()) {
                        for token_id in token_ids.iter().filter_map(|t| t.as_str()) {
                            discovered.intents_tokens.insert(token_id.to_string());
                        }
                    }
                    if let Some(token_id) = args.get("token_id").and_then(|t| t.as_str()) {
                        discovered.intents_tokens.insert(token_id.to_string());
                    }
                }
                "deposit_and_stake" | "unstake" | "unstake_all" | "withdraw" | "withdraw_all"
                    if predecessor == account_id && is_staking_pool(receiver) =>
                {
                    discovered.staking_pools.insert(receiver.to_string());
                }
                _ => {}
            }
        }
    }

    discovered
}

/// Query the configured activity indexers for asset keys touched in a block
/// range. Failures are logged and ignored.
pub async fn discovered_from_hints(
    hints: &ActivityHintService,
    account_id: &str,
    from_block: u64,
    to_block: u64,
) -> DiscoveredKeys {
    let mut discovered = DiscoveredKeys::default();

    for hint in hints
        .recent_activity(account_id, from_block, to_block)
        .await
    {
        let Some(token_id) = hint.token_id else {
            continue;
        };
        if let Some(intents_token) = token_id.strip_prefix("intents.near:") {
            discovered.intents_tokens.insert(intents_token.to_string());
        } else if token_id.contains(':') {
            // Bare intents namespace form, e.g. "nep141:eth.omft.near"
            discovered.intents_tokens.insert(token_id);
        } else if is_staking_pool(&token_id) {
            discovered.staking_pools.insert(token_id);
        } else if token_id != "near" {
            discovered.ft_contracts.insert(token_id);
        }
    }

    discovered
}

/// Fold discovered keys into the active keyset; returns true when anything
/// new was added (the signal to re-diff a located change).
pub fn widen_keyset(keyset: &mut TokenKeyset, discovered: &DiscoveredKeys) -> bool {
    let before = (
        keyset.ft_contracts.len(),
        keyset.intents_tokens.len(),
        keyset.staking_pools.len(),
    );

    for contract in &discovered.ft_contracts {
        keyset.add_ft(contract);
    }
    for token_id in &discovered.intents_tokens {
        keyset.add_intents(token_id);
    }
    for pool in &discovered.staking_pools {
        keyset.add_pool(pool);
    }

    before
        != (
            keyset.ft_contracts.len(),
            keyset.intents_tokens.len(),
            keyset.staking_pools.len(),
        )
}

fn decode_args(args: Option<&serde_json::Value>) -> serde_json::Value {
    args.and_then(|a| a.as_str())
        .and_then(|b64| BASE64_STANDARD.decode(b64).ok())
        .and_then(|decoded| serde_json::from_slice(&decoded).ok())
        .unwrap_or(serde_json::Value::Null)
}
