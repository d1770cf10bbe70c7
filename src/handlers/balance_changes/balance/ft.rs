//! Fungible Token (NEP-141) Balance Queries
//!
//! Queries FT balances in the token's smallest unit at specific block heights.

use bigdecimal::BigDecimal;
use near_api::{AccountId, Contract, Reference, types::Data};
use std::str::FromStr;

use crate::rpc::{MAX_BLOCK_FALLBACK, RpcError, RpcGateway};

/// Query an FT balance via `ft_balance_of` at a specific block height.
///
/// A contract that is not deployed at the queried block, or that does not
/// expose `ft_balance_of`, yields zero: a token contract that does not exist
/// yet holds nothing for anyone. Skipped blocks fall back to previous blocks
/// (up to 10 attempts).
pub async fn get_balance_at_block(
    gateway: &RpcGateway,
    account_id: &str,
    token_contract: &str,
    block_height: u64,
) -> Result<BigDecimal, RpcError> {
    let contract_id = AccountId::from_str(token_contract)
        .map_err(|e| RpcError::Rpc(format!("Invalid token contract {}: {}", token_contract, e)))?;

    for offset in 0..=MAX_BLOCK_FALLBACK {
        let current_block = block_height.saturating_sub(offset);

        let result: Result<Data<String>, RpcError> = gateway
            .execute("ft_balance_of", Some(current_block), Some(account_id), || {
                Contract(contract_id.clone())
                    .call_function(
                        "ft_balance_of",
                        serde_json::json!({ "account_id": account_id }),
                    )
                    .read_only()
                    .at(Reference::AtBlock(current_block))
                    .fetch_from(gateway.network())
            })
            .await;

        match result {
            Ok(balance) => {
                if offset > 0 {
                    log::warn!(
                        "Block {} not available for FT {}, used block {} instead (offset: {})",
                        block_height,
                        token_contract,
                        current_block,
                        offset
                    );
                }
                return BigDecimal::from_str(&balance.data).map_err(|e| {
                    RpcError::Rpc(format!(
                        "Invalid FT balance '{}' from {}: {}",
                        balance.data, token_contract, e
                    ))
                });
            }
            Err(RpcError::UnknownAccount { .. }) | Err(RpcError::MissingMethod { .. }) => {
                // Contract not deployed (yet) at this block
                return Ok(BigDecimal::from(0));
            }
            Err(RpcError::UnknownBlock { .. }) if offset < MAX_BLOCK_FALLBACK => {
                log::debug!(
                    "Block {} not available for FT {}, trying previous block",
                    current_block,
                    token_contract
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
