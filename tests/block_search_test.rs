//! Archival mainnet tests for the change locator and attributor.
//!
//! These hit the FastNear archival RPC against fixed historical blocks of
//! webassemblymusic-treasury.sputnik-dao.near, so results are stable. Set
//! FASTNEAR_API_KEY in .env to avoid public rate limits. Serialized to share
//! the pacing budget politely.

mod common;

use common::{dec, init_test_state};
use na_be::handlers::balance_changes::{attribution, binary_search};
use na_be::handlers::balance_changes::ledger::{TransferDirection, TransferType};
use na_be::handlers::balance_changes::snapshot::TokenKeyset;
use serial_test::serial;

const TREASURY: &str = "webassemblymusic-treasury.sputnik-dao.near";

#[tokio::test]
#[serial]
async fn test_native_snapshot_at_known_block() {
    let (state, _dir) = init_test_state().await;
    let keyset = TokenKeyset::native_only();

    // Block 151386339: balance went from 6.1002... to 11.1002... NEAR
    let before = state
        .oracle
        .snapshot_at_block(TREASURY, 151386338, &keyset)
        .await
        .expect("Snapshot query should succeed");
    let after = state
        .oracle
        .snapshot_at_block(TREASURY, 151386339, &keyset)
        .await
        .expect("Snapshot query should succeed");

    assert_eq!(before.native, Some(dec("6100211126630537100000000")));
    assert_eq!(after.native, Some(dec("11100211126630537100000000")));
}

#[tokio::test]
#[serial]
async fn test_locator_finds_native_change_in_narrow_range() {
    let (state, _dir) = init_test_state().await;
    let keyset = TokenKeyset::native_only();

    let located = binary_search::find_latest_change(
        &state.oracle,
        TREASURY,
        &keyset,
        151386338,
        151386340,
    )
    .await
    .expect("Search should succeed")
    .expect("Should find the change");

    assert_eq!(located.block, 151386339);
    assert!(located.changes.native_changed);
    assert_eq!(
        located.changes.native_diff,
        Some(dec("5000000000000000000000000"))
    );
}

#[tokio::test]
#[serial]
async fn test_locator_finds_ft_credit() {
    let (state, _dir) = init_test_state().await;

    // arizcredits.near credit of 3.0 ARIZ (3000000 raw with 6 decimals)
    let mut keyset = TokenKeyset::default();
    keyset.add_ft("arizcredits.near");

    let located = binary_search::find_latest_change(
        &state.oracle,
        TREASURY,
        &keyset,
        168568480,
        168568485,
    )
    .await
    .expect("Search should succeed")
    .expect("Should find the FT credit");

    assert_eq!(located.block, 168568482);
    let delta = located.changes.tokens_changed.get("arizcredits.near").unwrap();
    assert_eq!(delta.start, dec("0"));
    assert_eq!(delta.end, dec("3000000"));
    assert_eq!(delta.diff, dec("3000000"));
}

#[tokio::test]
#[serial]
async fn test_locator_enumerates_adjacent_block_changes() {
    let (state, _dir) = init_test_state().await;

    // eth.omft.near intents balance moved at 151391582, 151391583 and
    // 151391586; successive searches with end = block - 1 must find all
    // three without skipping the adjacent pair
    let mut keyset = TokenKeyset::default();
    keyset.add_intents("nep141:eth.omft.near");

    let located = binary_search::collect_changes(
        &state.oracle,
        TREASURY,
        &keyset,
        151391580,
        151391586,
        10,
    )
    .await
    .expect("Search should succeed");

    let blocks: Vec<u64> = located.iter().map(|c| c.block).collect();
    assert_eq!(blocks, vec![151391586, 151391583, 151391582]);

    // The middle change is the 10^16 -> 5*10^15 debit
    let middle = &located[1];
    let delta = middle
        .changes
        .intents_changed
        .get("nep141:eth.omft.near")
        .unwrap();
    assert_eq!(delta.start, dec("10000000000000000"));
    assert_eq!(delta.end, dec("5000000000000000"));
    assert_eq!(delta.diff, dec("-5000000000000000"));
}

#[tokio::test]
#[serial]
async fn test_locator_idempotent_over_same_range() {
    let (state, _dir) = init_test_state().await;
    let keyset = TokenKeyset::native_only();

    let first = binary_search::find_latest_change(
        &state.oracle,
        TREASURY,
        &keyset,
        151386338,
        151386340,
    )
    .await
    .unwrap()
    .unwrap();
    let second = binary_search::find_latest_change(
        &state.oracle,
        TREASURY,
        &keyset,
        151386338,
        151386340,
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(first.block, second.block);
    assert_eq!(first.changes, second.changes);
}

#[tokio::test]
#[serial]
async fn test_attribute_staking_deposit() {
    let (state, _dir) = init_test_state().await;

    // Block 161048664: 1000 NEAR sent to astro-stakers.poolv1.near via
    // deposit_and_stake
    let keyset = TokenKeyset::native_only();
    let located = binary_search::find_latest_change(
        &state.oracle,
        TREASURY,
        &keyset,
        161048660,
        161048668,
    )
    .await
    .expect("Search should succeed")
    .expect("Should find the outgoing stake");

    assert_eq!(located.block, 161048664);

    let attributed = attribution::attribute_change(&state.gateway, TREASURY, &located, None)
        .await
        .expect("Attribution should succeed");

    assert!(
        !attributed.transaction_hashes.is_empty(),
        "A signer transaction must explain the native change"
    );
    assert!(attributed.transaction_block <= located.block);
    assert!(attributed.block_timestamp > 0);

    let stake = attributed
        .transfers
        .iter()
        .find(|t| {
            t.transfer_type == TransferType::Native
                && t.counterparty == "astro-stakers.poolv1.near"
        })
        .expect("Should record the native movement to the pool");
    assert_eq!(stake.direction, TransferDirection::Out);
    assert_eq!(stake.amount, dec("1000000000000000000000000000"));
    assert_eq!(stake.memo.as_deref(), Some("deposit_and_stake"));
}
