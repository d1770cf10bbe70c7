mod common;

use common::{dec, native_entry};
use na_be::handlers::balance_changes::ledger::{
    AccountHistory, LedgerError, LedgerStore, VerificationError,
};
use na_be::handlers::balance_changes::snapshot::BalanceSnapshot;
use tempfile::TempDir;

const ACCOUNT: &str = "webassemblymusic-treasury.sputnik-dao.near";

fn store() -> (LedgerStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = LedgerStore::new(dir.path()).unwrap();
    (store, dir)
}

#[test]
fn test_insert_keeps_block_order() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    // Insert out of order, as a backward pass does
    assert!(store.insert(&mut history, native_entry(300, "900", "800")));
    assert!(store.insert(&mut history, native_entry(100, "0", "1000")));
    assert!(store.insert(&mut history, native_entry(200, "1000", "900")));

    let blocks: Vec<u64> = history.transactions.iter().map(|e| e.block).collect();
    assert_eq!(blocks, vec![100, 200, 300]);

    assert_eq!(history.metadata.first_block, Some(100));
    assert_eq!(history.metadata.last_block, Some(300));
    assert_eq!(history.metadata.total_transactions, 3);
}

#[test]
fn test_insert_is_idempotent_on_block() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    assert!(store.insert(&mut history, native_entry(100, "0", "1000")));
    assert!(!store.insert(&mut history, native_entry(100, "5", "42")));

    assert_eq!(history.transactions.len(), 1);
    // The original entry wins
    assert_eq!(
        history.transactions[0].balance_after.native,
        Some(dec("1000"))
    );
}

#[test]
fn test_history_complete_requires_zero_origin() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    store.insert(&mut history, native_entry(200, "1000", "900"));
    assert!(!history.metadata.history_complete);

    // An earlier entry starting from the zero snapshot marks the origin
    store.insert(&mut history, native_entry(100, "0", "1000"));
    assert!(history.metadata.history_complete);
}

#[test]
fn test_connected_chain_verifies() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    store.insert(&mut history, native_entry(100, "0", "1000"));
    store.insert(&mut history, native_entry(200, "1000", "900"));

    let first = &history.transactions[0];
    let second = &history.transactions[1];

    assert!(first.verification_with_next.as_ref().unwrap().verified);
    assert!(second.verification_with_prev.as_ref().unwrap().verified);
    assert!(first.verification_with_prev.is_none());
    assert!(second.verification_with_next.is_none());
}

#[test]
fn test_broken_chain_reports_typed_mismatch() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    store.insert(&mut history, native_entry(100, "0", "1000"));
    store.insert(&mut history, native_entry(200, "700", "600"));

    let verification = history.transactions[1]
        .verification_with_prev
        .clone()
        .unwrap();
    assert!(!verification.verified);
    assert_eq!(verification.errors.len(), 1);
    match &verification.errors[0] {
        VerificationError::NativeBalanceMismatch { expected, actual } => {
            assert_eq!(expected, &dec("1000"));
            assert_eq!(actual, &dec("700"));
        }
        other => panic!("Expected native mismatch, got {:?}", other),
    }

    // The error serializes under its spec name
    let json = serde_json::to_value(&verification.errors[0]).unwrap();
    assert_eq!(json["type"], "native_balance_mismatch");
}

#[test]
fn test_save_and_load_roundtrip() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);

    let mut entry = native_entry(100, "0", "1000");
    // A queried zero FT balance must survive the roundtrip as a zero, while
    // unqueried maps stay absent
    entry
        .balance_before
        .fungible_tokens
        .insert("arizcredits.near".to_string(), dec("0"));
    entry
        .balance_after
        .fungible_tokens
        .insert("arizcredits.near".to_string(), dec("0"));
    store.insert(&mut history, entry);

    store.save(&history).unwrap();
    let loaded = store.load(ACCOUNT).unwrap();

    assert_eq!(loaded.account_id, history.account_id);
    assert_eq!(loaded.transactions, history.transactions);
    assert_eq!(loaded.metadata, history.metadata);
    assert_eq!(
        loaded.transactions[0]
            .balance_before
            .fungible_tokens
            .get("arizcredits.near"),
        Some(&dec("0"))
    );
    assert!(loaded.transactions[0].balance_before.intents_tokens.is_empty());

    // No temp file left behind by the atomic rewrite
    let stray: Vec<_> = std::fs::read_dir(store.data_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
        .collect();
    assert!(stray.is_empty(), "Temp file left behind: {:?}", stray);
}

#[test]
fn test_amounts_serialize_as_decimal_strings() {
    let (store, _dir) = store();
    let mut history = AccountHistory::new(ACCOUNT);
    store.insert(
        &mut history,
        native_entry(
            161048664,
            "1001000000000000000000000000",
            "1000000000000000000000000",
        ),
    );
    store.save(&history).unwrap();

    let raw = std::fs::read_to_string(store.path_for(ACCOUNT)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

    let entry = &value["transactions"][0];
    assert_eq!(
        entry["balanceBefore"]["native"],
        "1001000000000000000000000000"
    );
    assert_eq!(entry["changes"]["nativeChanged"], true);
    assert!(entry["changes"]["nativeDiff"].is_string());
    assert_eq!(entry["block"], 161048664);
}

#[test]
fn test_load_missing_file_returns_fresh_history() {
    let (store, _dir) = store();
    let history = store.load("never-seen.near").unwrap();

    assert_eq!(history.account_id, "never-seen.near");
    assert!(history.transactions.is_empty());
    assert!(!history.metadata.history_complete);
}

#[test]
fn test_load_refuses_malformed_file() {
    let (store, _dir) = store();

    std::fs::write(store.path_for(ACCOUNT), "{not json").unwrap();

    match store.load(ACCOUNT) {
        Err(LedgerError::Malformed { .. }) => {}
        other => panic!("Expected Malformed error, got {:?}", other.map(|_| ())),
    }

    // The malformed file is untouched for the operator to inspect
    assert_eq!(
        std::fs::read_to_string(store.path_for(ACCOUNT)).unwrap(),
        "{not json"
    );
}

#[test]
fn test_zero_origin_snapshot() {
    let snapshot = BalanceSnapshot {
        native: Some(dec("0")),
        ..Default::default()
    };
    assert!(snapshot.is_zero_origin());
    assert!(!BalanceSnapshot::default().is_zero_origin());
}
