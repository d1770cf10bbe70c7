//! NEAR Native Token Balance Queries
//!
//! Queries the total controlled native balance (amount + locked) at specific
//! block heights via the archival gateway.

use bigdecimal::BigDecimal;
use near_api::{AccountId, Reference, Tokens};
use std::str::FromStr;

use crate::rpc::{MAX_BLOCK_FALLBACK, RpcError, RpcGateway};

/// Query the native balance in yoctoNEAR at a specific block height.
///
/// When the node reports a skipped or unavailable block, retries at previous
/// blocks (up to 10 attempts) and logs the effective height. An account that
/// does not exist at the queried block yields a dense zero, so search ranges
/// spanning account creation stay well-defined.
pub async fn get_balance_at_block(
    gateway: &RpcGateway,
    account_id: &str,
    block_height: u64,
) -> Result<BigDecimal, RpcError> {
    let account = AccountId::from_str(account_id)
        .map_err(|e| RpcError::Rpc(format!("Invalid account id {}: {}", account_id, e)))?;

    for offset in 0..=MAX_BLOCK_FALLBACK {
        let current_block = block_height.saturating_sub(offset);

        let result = gateway
            .execute("near_balance", Some(current_block), Some(account_id), || {
                Tokens::account(account.clone())
                    .near_balance()
                    .at(Reference::AtBlock(current_block))
                    .fetch_from(gateway.network())
            })
            .await;

        match result {
            Ok(balance) => {
                if offset > 0 {
                    log::warn!(
                        "Block {} not available, used block {} instead (offset: {})",
                        block_height,
                        current_block,
                        offset
                    );
                }
                return Ok(BigDecimal::from(balance.total.as_yoctonear()));
            }
            Err(RpcError::UnknownAccount { .. }) => {
                // Account not yet created at this block
                return Ok(BigDecimal::from(0));
            }
            Err(RpcError::UnknownBlock { .. }) if offset < MAX_BLOCK_FALLBACK => {
                log::debug!(
                    "Block {} not available, trying previous block",
                    current_block
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
