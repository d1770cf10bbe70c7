//! Staking Pool Balance Queries
//!
//! Queries delegated stake via the `get_account_total_balance` view function
//! on validator pool contracts. The total includes both staked and
//! unstaked-pending-withdrawal amounts; the pool contract holds the stake
//! under its own account, so this never double-counts the native balance.
//!
//! # Staking Pool Patterns
//! - `*.poolv1.near` - NEAR staking pools (v1)
//! - `*.pool.near` - NEAR staking pools

use bigdecimal::BigDecimal;
use near_api::types::json::U128;
use near_api::{AccountId, Contract, Reference, types::Data};
use std::str::FromStr;

use crate::rpc::{MAX_BLOCK_FALLBACK, RpcError, RpcGateway};

/// NEAR mainnet epoch length in blocks (~12 hours)
pub const EPOCH_LENGTH_BLOCKS: u64 = 43_200;

/// Staking pool parent accounts
const POOLV1_NEAR: &str = "poolv1.near";
const POOL_NEAR: &str = "pool.near";

/// Check if an account ID matches a staking pool pattern
///
/// Uses NEAR's AccountId type for proper subaccount validation.
pub fn is_staking_pool(account_id: &str) -> bool {
    let Ok(account) = AccountId::from_str(account_id) else {
        return false;
    };

    let Ok(poolv1) = AccountId::from_str(POOLV1_NEAR) else {
        return false;
    };
    let Ok(pool) = AccountId::from_str(POOL_NEAR) else {
        return false;
    };

    account.is_sub_account_of(&poolv1) || account.is_sub_account_of(&pool)
}

/// Query the total delegated balance (staked + unstaked) in yoctoNEAR for an
/// account at a specific block height.
///
/// A pool contract that does not exist at the queried block yields zero.
/// Skipped blocks fall back to previous blocks (up to 10 attempts).
pub async fn get_balance_at_block(
    gateway: &RpcGateway,
    account_id: &str,
    staking_pool: &str,
    block_height: u64,
) -> Result<BigDecimal, RpcError> {
    let pool_account_id = AccountId::from_str(staking_pool)
        .map_err(|e| RpcError::Rpc(format!("Invalid staking pool {}: {}", staking_pool, e)))?;

    for offset in 0..=MAX_BLOCK_FALLBACK {
        let current_block = block_height.saturating_sub(offset);

        let result: Result<Data<U128>, RpcError> = gateway
            .execute(
                "get_account_total_balance",
                Some(current_block),
                Some(account_id),
                || {
                    Contract(pool_account_id.clone())
                        .call_function(
                            "get_account_total_balance",
                            serde_json::json!({ "account_id": account_id }),
                        )
                        .read_only()
                        .at(Reference::AtBlock(current_block))
                        .fetch_from(gateway.network())
                },
            )
            .await;

        match result {
            Ok(data) => {
                if offset > 0 {
                    log::warn!(
                        "Block {} not available for staking pool {}, used block {} instead (offset: {})",
                        block_height,
                        staking_pool,
                        current_block,
                        offset
                    );
                }
                return Ok(BigDecimal::from(data.data.0));
            }
            Err(RpcError::UnknownAccount { .. }) | Err(RpcError::MissingMethod { .. }) => {
                return Ok(BigDecimal::from(0));
            }
            Err(RpcError::UnknownBlock { .. }) if offset < MAX_BLOCK_FALLBACK => {
                log::debug!(
                    "Block {} not available for staking pool {}, trying previous block",
                    current_block,
                    staking_pool
                );
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(RpcError::UnknownBlock {
        height: block_height,
        message: format!(
            "No available block within {} of requested height",
            MAX_BLOCK_FALLBACK
        ),
    })
}

/// Calculate the epoch number for a given block height
pub fn block_to_epoch(block_height: u64) -> u64 {
    block_height / EPOCH_LENGTH_BLOCKS
}

/// Calculate the first block of a given epoch
pub fn epoch_to_block(epoch: u64) -> u64 {
    epoch * EPOCH_LENGTH_BLOCKS
}
