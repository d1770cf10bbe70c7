//! Balance Snapshots and Keysets
//!
//! A `BalanceSnapshot` is the observed state of one account at one block,
//! restricted to the asset keys that were actually queried. The maps are
//! sparse: an absent key means "not queried", while a present key with value
//! zero means "queried and confirmed zero". The distinction is preserved
//! through JSON round-trips, so a ledger entry never claims knowledge it does
//! not have.
//!
//! A `TokenKeyset` names the keys to query. Its fingerprint keys the snapshot
//! cache so that snapshots taken under different keysets never collide.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The set of asset keys to include when taking a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenKeyset {
    /// Whether to query the native balance
    pub native: bool,
    /// FT contract ids (NEP-141)
    pub ft_contracts: Vec<String>,
    /// Intents token ids, e.g. "nep141:eth.omft.near" (NEP-245 on intents.near)
    pub intents_tokens: Vec<String>,
    /// Staking pool contract ids
    pub staking_pools: Vec<String>,
}

impl TokenKeyset {
    /// Keyset covering only the native balance
    pub fn native_only() -> Self {
        Self {
            native: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.native
            && self.ft_contracts.is_empty()
            && self.intents_tokens.is_empty()
            && self.staking_pools.is_empty()
    }

    /// Add keys, keeping each list sorted and deduplicated
    pub fn add_ft(&mut self, contract: &str) {
        insert_sorted(&mut self.ft_contracts, contract);
    }

    pub fn add_intents(&mut self, token_id: &str) {
        insert_sorted(&mut self.intents_tokens, token_id);
    }

    pub fn add_pool(&mut self, pool: &str) {
        insert_sorted(&mut self.staking_pools, pool);
    }

    /// Stable fingerprint over the sorted key lists, used in cache keys
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(if self.native { b"native;" as &[u8] } else { b";" });
        for key in &self.ft_contracts {
            hasher.update(b"ft:");
            hasher.update(key.as_bytes());
            hasher.update(b";");
        }
        for key in &self.intents_tokens {
            hasher.update(b"mt:");
            hasher.update(key.as_bytes());
            hasher.update(b";");
        }
        for key in &self.staking_pools {
            hasher.update(b"pool:");
            hasher.update(key.as_bytes());
            hasher.update(b";");
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

fn insert_sorted(keys: &mut Vec<String>, key: &str) {
    if let Err(pos) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
        keys.insert(pos, key.to_string());
    }
}

/// Observed balances for one account at one block, sparse per asset key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Total controlled native balance (amount + locked), absent when not queried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<BigDecimal>,
    /// FT contract id -> raw balance in the token's smallest unit
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fungible_tokens: BTreeMap<String, BigDecimal>,
    /// Intents token id -> raw balance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub intents_tokens: BTreeMap<String, BigDecimal>,
    /// Staking pool id -> total delegated balance (staked + unstaked)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub staking_pools: BTreeMap<String, BigDecimal>,
}

impl BalanceSnapshot {
    /// True when no asset key was queried at all
    pub fn is_empty(&self) -> bool {
        self.native.is_none()
            && self.fungible_tokens.is_empty()
            && self.intents_tokens.is_empty()
            && self.staking_pools.is_empty()
    }

    /// True when this snapshot is the account-creation origin: the native
    /// balance was queried and is zero, and every queried key is zero.
    pub fn is_zero_origin(&self) -> bool {
        let zero = BigDecimal::from(0);
        match &self.native {
            Some(native) => {
                native == &zero
                    && self.fungible_tokens.values().all(|v| v == &zero)
                    && self.intents_tokens.values().all(|v| v == &zero)
                    && self.staking_pools.values().all(|v| v == &zero)
            }
            None => false,
        }
    }

    /// Snapshot equality under the dense key union.
    ///
    /// Both sides must have queried the same keys with equal values. A key
    /// present on one side but absent on the other counts as a difference;
    /// the locator reacts by widening the keyset and re-querying.
    pub fn same_balances(&self, other: &BalanceSnapshot) -> bool {
        self.native == other.native
            && self.fungible_tokens == other.fungible_tokens
            && self.intents_tokens == other.intents_tokens
            && self.staking_pools == other.staking_pools
    }

    /// Compute the compact per-key diff between this snapshot (before) and
    /// `after`. Keys absent on either side are ignored: a sparse key cannot
    /// witness a change.
    pub fn diff(&self, after: &BalanceSnapshot) -> EntryChanges {
        let (native_changed, native_diff) = match (&self.native, &after.native) {
            (Some(before), Some(end)) if before != end => (true, Some(end - before)),
            _ => (false, None),
        };

        EntryChanges {
            native_changed,
            native_diff,
            tokens_changed: diff_maps(&self.fungible_tokens, &after.fungible_tokens),
            intents_changed: diff_maps(&self.intents_tokens, &after.intents_tokens),
            staking_changed: diff_maps(&self.staking_pools, &after.staking_pools),
        }
    }

    /// Restrict this snapshot to the asset classes a set of changes concerns.
    /// Used when storing ledger entries: an entry asserts every queried key
    /// of a class it touched (those values chain to the neighbors), and stays
    /// sparse for classes it did not.
    pub fn restricted_to(&self, changes: &EntryChanges) -> BalanceSnapshot {
        BalanceSnapshot {
            native: if changes.native_changed {
                self.native.clone()
            } else {
                None
            },
            fungible_tokens: if changes.tokens_changed.is_empty() {
                BTreeMap::new()
            } else {
                self.fungible_tokens.clone()
            },
            intents_tokens: if changes.intents_changed.is_empty() {
                BTreeMap::new()
            } else {
                self.intents_tokens.clone()
            },
            staking_pools: if changes.staking_changed.is_empty() {
                BTreeMap::new()
            } else {
                self.staking_pools.clone()
            },
        }
    }
}

fn diff_maps(
    before: &BTreeMap<String, BigDecimal>,
    after: &BTreeMap<String, BigDecimal>,
) -> BTreeMap<String, BalanceDelta> {
    let mut changed = BTreeMap::new();
    for (key, start) in before {
        if let Some(end) = after.get(key)
            && start != end
        {
            changed.insert(
                key.clone(),
                BalanceDelta {
                    start: start.clone(),
                    end: end.clone(),
                    diff: end - start,
                },
            );
        }
    }
    changed
}

/// One asset key's movement within a ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub start: BigDecimal,
    pub end: BigDecimal,
    pub diff: BigDecimal,
}

/// Compact diff stored on each ledger entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryChanges {
    pub native_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_diff: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tokens_changed: BTreeMap<String, BalanceDelta>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub intents_changed: BTreeMap<String, BalanceDelta>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub staking_changed: BTreeMap<String, BalanceDelta>,
}

impl EntryChanges {
    pub fn is_empty(&self) -> bool {
        !self.native_changed
            && self.tokens_changed.is_empty()
            && self.intents_changed.is_empty()
            && self.staking_changed.is_empty()
    }

    /// True when the only movement is delegated stake (epoch reward accrual)
    pub fn is_staking_only(&self) -> bool {
        !self.native_changed
            && self.tokens_changed.is_empty()
            && self.intents_changed.is_empty()
            && !self.staking_changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_keyset_fingerprint_is_order_independent() {
        let mut a = TokenKeyset::native_only();
        a.add_ft("wrap.near");
        a.add_ft("arizcredits.near");

        let mut b = TokenKeyset::native_only();
        b.add_ft("arizcredits.near");
        b.add_ft("wrap.near");

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_keyset_fingerprint_distinguishes_classes() {
        let mut ft = TokenKeyset::native_only();
        ft.add_ft("wrap.near");

        let mut pool = TokenKeyset::native_only();
        pool.add_pool("wrap.near");

        assert_ne!(ft.fingerprint(), pool.fingerprint());
    }

    #[test]
    fn test_keyset_add_is_idempotent() {
        let mut keyset = TokenKeyset::native_only();
        keyset.add_ft("wrap.near");
        keyset.add_ft("wrap.near");
        assert_eq!(keyset.ft_contracts, vec!["wrap.near"]);
    }

    #[test]
    fn test_zero_origin() {
        let mut snapshot = BalanceSnapshot {
            native: Some(dec("0")),
            ..Default::default()
        };
        assert!(snapshot.is_zero_origin());

        snapshot
            .fungible_tokens
            .insert("wrap.near".to_string(), dec("0"));
        assert!(snapshot.is_zero_origin());

        snapshot
            .fungible_tokens
            .insert("arizcredits.near".to_string(), dec("3000000"));
        assert!(!snapshot.is_zero_origin());

        // An unqueried native balance is not a witnessed origin
        let sparse = BalanceSnapshot::default();
        assert!(!sparse.is_zero_origin());
    }

    #[test]
    fn test_diff_native_and_tokens() {
        let before = BalanceSnapshot {
            native: Some(dec("6100211126630537100000000")),
            fungible_tokens: [("arizcredits.near".to_string(), dec("0"))].into(),
            ..Default::default()
        };
        let after = BalanceSnapshot {
            native: Some(dec("11100211126630537100000000")),
            fungible_tokens: [("arizcredits.near".to_string(), dec("3000000"))].into(),
            ..Default::default()
        };

        let changes = before.diff(&after);
        assert!(changes.native_changed);
        assert_eq!(changes.native_diff, Some(dec("5000000000000000000000000")));
        let delta = changes.tokens_changed.get("arizcredits.near").unwrap();
        assert_eq!(delta.start, dec("0"));
        assert_eq!(delta.end, dec("3000000"));
        assert_eq!(delta.diff, dec("3000000"));
    }

    #[test]
    fn test_diff_ignores_sparse_keys() {
        let before = BalanceSnapshot {
            native: Some(dec("100")),
            ..Default::default()
        };
        let after = BalanceSnapshot {
            native: Some(dec("100")),
            fungible_tokens: [("wrap.near".to_string(), dec("5"))].into(),
            ..Default::default()
        };

        // wrap.near was not queried on the before side, so no change is witnessed
        let changes = before.diff(&after);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_intents_debit_diff() {
        // nep141:eth.omft.near 10000000000000000 -> 5000000000000000
        let before = BalanceSnapshot {
            intents_tokens: [("nep141:eth.omft.near".to_string(), dec("10000000000000000"))]
                .into(),
            ..Default::default()
        };
        let after = BalanceSnapshot {
            intents_tokens: [("nep141:eth.omft.near".to_string(), dec("5000000000000000"))].into(),
            ..Default::default()
        };

        let changes = before.diff(&after);
        let delta = changes.intents_changed.get("nep141:eth.omft.near").unwrap();
        assert_eq!(delta.diff, dec("-5000000000000000"));
        assert!(!changes.is_staking_only());
    }

    #[test]
    fn test_staking_only_detection() {
        let before = BalanceSnapshot {
            staking_pools: [("astro-stakers.poolv1.near".to_string(), dec("1000"))].into(),
            ..Default::default()
        };
        let after = BalanceSnapshot {
            staking_pools: [("astro-stakers.poolv1.near".to_string(), dec("1001"))].into(),
            ..Default::default()
        };

        let changes = before.diff(&after);
        assert!(changes.is_staking_only());
    }

    #[test]
    fn test_restricted_to_changes() {
        let snapshot = BalanceSnapshot {
            native: Some(dec("100")),
            fungible_tokens: [
                ("wrap.near".to_string(), dec("5")),
                ("arizcredits.near".to_string(), dec("3000000")),
            ]
            .into(),
            ..Default::default()
        };

        let changes = EntryChanges {
            native_changed: false,
            tokens_changed: [(
                "arizcredits.near".to_string(),
                BalanceDelta {
                    start: dec("0"),
                    end: dec("3000000"),
                    diff: dec("3000000"),
                },
            )]
            .into(),
            ..Default::default()
        };

        let restricted = snapshot.restricted_to(&changes);
        // Native stays sparse (it did not change), but the FT class keeps
        // every queried key so it chains against neighboring entries
        assert!(restricted.native.is_none());
        assert_eq!(restricted.fungible_tokens.len(), 2);
        assert!(restricted.intents_tokens.is_empty());
    }

    #[test]
    fn test_sparse_vs_zero_roundtrip() {
        let snapshot = BalanceSnapshot {
            native: Some(dec("0")),
            fungible_tokens: [("wrap.near".to_string(), dec("0"))].into(),
            ..Default::default()
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: BalanceSnapshot = serde_json::from_str(&json).unwrap();

        // The queried zero survives; intents/staking maps stay absent
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.fungible_tokens.get("wrap.near"), Some(&dec("0")));
        assert!(parsed.intents_tokens.is_empty());

        // Values serialize as decimal strings, never floats
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["native"].is_string());
        assert!(value["fungibleTokens"]["wrap.near"].is_string());
    }
}
