//! NEAR Intents Multi-Token Balance Queries
//!
//! Queries NEP-245 multi-token balances on the `intents.near` contract.
//! Token ids use the intents namespace, e.g. "nep141:eth.omft.near".

use bigdecimal::BigDecimal;
use near_api::{AccountId, Contract, Reference, types::Data};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::constants::INTENTS_CONTRACT;
use crate::rpc::{MAX_BLOCK_FALLBACK, RpcError, RpcGateway};

/// Query intents balances for a batch of token ids at a specific block height.
///
/// Uses `mt_batch_balance_of` so the whole requested keyset costs one RPC
/// call. A missing contract or method yields zeros for every requested token.
pub async fn get_batch_balances_at_block(
    gateway: &RpcGateway,
    account_id: &str,
    token_ids: &[String],
    block_height: u64,
) -> Result<BTreeMap<String, BigDecimal>, RpcError> {
    if token_ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let contract_id = AccountId::from_str(INTENTS_CONTRACT)
        .map_err(|e| RpcError::Rpc(format!("Invalid intents contract id: {}", e)))?;

    for offset in 0..=MAX_BLOCK_FALLBACK {
        let current_block = block_height.saturating_sub(offset);

        let result: Result<Data<Vec<String>>, RpcError> = gateway
            .execute(
                "mt_batch_balance_of",
                Some(current_block),
                Some(account_id),
                || {
                    Contract(contract_id.clone())
                        .call_function(
                            "mt_batch_balance_of",
                            serde_json::json!({
                                "account_id": account_id,
                                "token_ids": token_ids,
                            }),
                        )
                        .read_only()
                        .at(Reference::AtBlock(current_block))
                        .fetch_from(gateway.network())
                },
            )
            .await;

        match result {
            Ok(balances) => {
                if offset > 0 {
                    log::warn!(
                        "Block {} not available for intents batch, used block {} instead (offset: {})",
                        block_height,
                        current_block,
                        offset
                    );
                }

                let mut result = BTreeMap::new();
                for (token_id, raw) in token_ids.iter().zip(balances.data.iter()) {
                    let value = BigDecimal::from_str(raw).map_err(|e| {
                        RpcError::Rpc(format!(
                            "Invalid intents balance '{}' for {}: {}",
                            raw, token_id, e
                        ))
                    })?;
                    result.insert(token_id.clone(), value);
                }
                return Ok(result);
            }
            Err(RpcError::UnknownAccount { .. }) | Err(RpcError::MissingMethod { .. }) => {
                return Ok(token_ids
                    .iter()
                    .map(|t| (t.clone(), BigDecimal::from(0)))
                    .collect());
            }
            Err(RpcError::UnknownBlock { .. }) if offset < MAX_BLOCK_FALLBACK => {
                log::debug!(
                    "Block {} not available for intents batch, trying previous block",
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
