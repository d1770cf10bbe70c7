//! Continuous Sync Scheduler
//!
//! Drives the per-account sync cycle over the registered roster. Each cycle:
//! 1. Clears the rate-limit stop signal left over from the previous cycle
//! 2. Loads the eligible accounts (registered, enabled, not expired)
//! 3. For each account, runs one pipeline under a hard timeout, guarded by a
//!    single-flight set so no account ever has two pipelines at once
//!
//! A pipeline is forward-first (freshness over completeness): locate and
//! record changes from the last known block up to the chain tip, then work
//! backward toward account creation while the history is incomplete, then
//! repair gaps and re-enrich sparse entries.
//!
//! Accounts are processed sequentially; the RPC gateway is a single
//! serialized egress point and interleaving pipelines would only reshuffle
//! the same pacing budget.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::{Duration, sleep, timeout};

use super::balance::staking::EPOCH_LENGTH_BLOCKS;
use super::binary_search;
use super::block_info::{self, new_timestamp_cache};
use super::gap_detector;
use super::gap_filler::{self, GapFillerError};
use super::ledger::{self, AccountHistory};
use super::snapshot::TokenKeyset;
use super::token_discovery;
use crate::AppState;
use crate::constants::SEED_LOOKBACK_BLOCKS;

/// What one account pipeline accomplished
#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub forward_inserted: usize,
    pub backward_inserted: usize,
    pub gaps_filled: usize,
    pub entries_enriched: usize,
    pub history_complete: bool,
}

/// Run monitor cycles until shutdown, sleeping `cycle_delay_ms` in between
pub async fn run_monitor_loop(state: Arc<AppState>) {
    log::info!(
        "Balance monitor started (cycle delay {}ms, account timeout {}ms)",
        state.env_vars.cycle_delay_ms,
        state.env_vars.account_timeout_ms
    );

    while !state.shutdown.load(Ordering::SeqCst) {
        if let Err(e) = run_monitor_cycle(&state).await {
            log::error!("Monitor cycle failed: {}", e);
        }

        // Sleep in small steps so shutdown is observed promptly
        let mut remaining = state.env_vars.cycle_delay_ms;
        while remaining > 0 && !state.shutdown.load(Ordering::SeqCst) {
            let step = remaining.min(500);
            sleep(Duration::from_millis(step)).await;
            remaining -= step;
        }
    }

    log::info!("Balance monitor stopped");
}

/// Run one cycle over all eligible accounts
pub async fn run_monitor_cycle(state: &AppState) -> Result<(), GapFillerError> {
    // A rate limit from the previous cycle has been waited out by now
    state.gateway.stop_signal().clear();

    let accounts = state.registry.eligible().await;
    if accounts.is_empty() {
        log::debug!("No eligible accounts to monitor");
        return Ok(());
    }

    log::info!("Monitoring {} eligible account(s)", accounts.len());

    for account in accounts {
        if state.shutdown.load(Ordering::SeqCst) {
            log::info!("Shutdown requested, stopping cycle");
            break;
        }

        let account_id = account.account_id.clone();

        // Single-flight: skip accounts that already have a pipeline running
        {
            let mut active = state.active_accounts.lock().await;
            if !active.insert(account_id.clone()) {
                log::debug!("Pipeline already active for {}, skipping", account_id);
                continue;
            }
        }

        let result = timeout(
            Duration::from_millis(state.env_vars.account_timeout_ms),
            run_account_pipeline(state, &account_id),
        )
        .await;

        state.active_accounts.lock().await.remove(&account_id);

        match result {
            Ok(Ok(summary)) => {
                log::info!(
                    "{}: +{} forward, +{} backward, {} gap(s) filled, {} enriched{}",
                    account_id,
                    summary.forward_inserted,
                    summary.backward_inserted,
                    summary.gaps_filled,
                    summary.entries_enriched,
                    if summary.history_complete {
                        ", history complete"
                    } else {
                        ""
                    }
                );
                if let Err(e) = state.registry.touch_synced(&account_id).await {
                    log::warn!("Failed to update sync timestamp for {}: {}", account_id, e);
                }
            }
            Ok(Err(e)) => {
                if state.gateway.stop_signal().is_set() {
                    // Rate limited: abort the cycle; the next one clears the
                    // signal after the cycle delay
                    log::warn!("Rate limited while processing {}; aborting cycle", account_id);
                    break;
                }
                log::error!("Pipeline for {} failed: {}", account_id, e);
            }
            Err(_elapsed) => {
                // Entries already inserted were saved individually, so an
                // abandoned pipeline loses nothing
                log::warn!(
                    "Pipeline for {} timed out after {}ms; moving on",
                    account_id,
                    state.env_vars.account_timeout_ms
                );
            }
        }
    }

    log::debug!("Monitor cycle complete");
    Ok(())
}

/// One sync pipeline for one account
pub async fn run_account_pipeline(
    state: &AppState,
    account_id: &str,
) -> Result<PipelineSummary, GapFillerError> {
    let mut summary = PipelineSummary::default();
    let mut history = state.store.load(account_id)?;
    let mut keyset = token_discovery::keyset_from_history(&history);

    let tip = block_info::get_current_block_height(&state.gateway).await?;
    let ts_cache = new_timestamp_cache();

    // External indexers may know about tokens the history has never seen
    if let Some(hints) = &state.hints {
        let hint_from = history
            .metadata
            .last_block
            .unwrap_or_else(|| tip.saturating_sub(SEED_LOOKBACK_BLOCKS));
        let discovered =
            token_discovery::discovered_from_hints(hints, account_id, hint_from, tip).await;
        if token_discovery::widen_keyset(&mut keyset, &discovered) {
            log::info!("Hint providers widened the keyset for {}", account_id);
        }
    }

    // --- Forward pass: newest history first ---
    // With existing entries, the cheap tip comparison decides whether the
    // bisection is worth running at all
    let forward_range = if history.transactions.is_empty() {
        Some((tip.saturating_sub(SEED_LOOKBACK_BLOCKS).max(1), tip))
    } else {
        gap_detector::find_gap_to_present(&state.oracle, account_id, &keyset, &history, tip)
            .await?
    };

    if let Some((forward_start, forward_end)) = forward_range {
        summary.forward_inserted = run_directional_pass(
            state,
            &mut history,
            &mut keyset,
            forward_start,
            forward_end,
            &ts_cache,
        )
        .await?;
    }

    // --- Backward pass: only while the origin has not been reached ---
    if !history.metadata.history_complete
        && let Some(first_block) = history.metadata.first_block
        && first_block > 1
    {
        let depth = state.env_vars.max_epochs_per_cycle * EPOCH_LENGTH_BLOCKS;
        let backward_start = first_block.saturating_sub(depth).max(1);

        summary.backward_inserted = run_directional_pass(
            state,
            &mut history,
            &mut keyset,
            backward_start,
            first_block - 1,
            &ts_cache,
        )
        .await?;
    }

    // --- Gap repair ---
    summary.gaps_filled =
        gap_filler::fill_gaps(&state.oracle, &state.store, &mut history, &mut keyset, Some(&ts_cache))
            .await?;

    // --- Re-enrichment of sparse entries ---
    summary.entries_enriched = ledger::re_enrich(
        &state.oracle,
        &mut history,
        state.env_vars.batch_size,
    )
    .await?;

    summary.history_complete = history.metadata.history_complete;
    state.store.save(&history)?;

    Ok(summary)
}

/// Locate and record changes in `[start, end]`, latest first, bounded by the
/// configured batch size
async fn run_directional_pass(
    state: &AppState,
    history: &mut AccountHistory,
    keyset: &mut TokenKeyset,
    start: u64,
    end: u64,
    ts_cache: &block_info::BlockTimestampCache,
) -> Result<usize, GapFillerError> {
    if start > end {
        return Ok(0);
    }

    let account_id = history.account_id.clone();
    let mut inserted = 0;
    let mut search_end = end;

    while inserted < state.env_vars.batch_size && search_end >= start {
        let located = binary_search::find_latest_change(
            &state.oracle,
            &account_id,
            keyset,
            start,
            search_end,
        )
        .await?;

        let Some(located) = located else {
            break;
        };

        let next_end = located.block.saturating_sub(1);

        let outcome = gap_filler::record_located_change(
            &state.oracle,
            &state.store,
            history,
            keyset,
            located,
            Some(ts_cache),
        )
        .await?;

        if outcome.inserted() {
            inserted += 1;
        }

        if next_end < start {
            break;
        }
        search_end = next_end;
    }

    Ok(inserted)
}
