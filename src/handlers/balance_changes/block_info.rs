//! Block Information Service
//!
//! Queries block metadata, chunk contents, per-account state change causes
//! and transaction status through the RPC gateway. These are the raw
//! materials the attributor turns into transfer records.

use near_api::{Chain, Reference};
use near_jsonrpc_client::methods;
use near_primitives::hash::CryptoHash;
use near_primitives::types::{BlockId, BlockReference};
use near_primitives::views::StateChangesRequestView;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::rpc::{RpcError, RpcGateway};

// Re-export types from near-primitives for convenience
pub use near_primitives::views::{
    ReceiptView, SignedTransactionView, StateChangeWithCauseView,
};

/// In-memory cache for block timestamps to avoid redundant RPC calls
pub type BlockTimestampCache = Arc<RwLock<HashMap<u64, i64>>>;

/// Create a new block timestamp cache
pub fn new_timestamp_cache() -> BlockTimestampCache {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Header data for one block
#[derive(Debug, Clone)]
pub struct BlockHeaderInfo {
    pub height: u64,
    pub timestamp_nanos: i64,
    pub chunk_hashes: Vec<String>,
}

/// Get the current chain tip height
pub async fn get_current_block_height(gateway: &RpcGateway) -> Result<u64, RpcError> {
    let block = gateway
        .execute("current_block", None, None, || {
            Chain::block().fetch_from(gateway.network())
        })
        .await?;
    Ok(block.header.height)
}

/// Get block header info at a specific height
pub async fn get_block_header(
    gateway: &RpcGateway,
    block_height: u64,
) -> Result<BlockHeaderInfo, RpcError> {
    let block = gateway
        .execute("block", Some(block_height), None, || {
            Chain::block()
                .at(Reference::AtBlock(block_height))
                .fetch_from(gateway.network())
        })
        .await?;

    Ok(BlockHeaderInfo {
        height: block.header.height,
        timestamp_nanos: block.header.timestamp as i64,
        chunk_hashes: block
            .chunks
            .iter()
            .map(|c| c.chunk_hash.to_string())
            .collect(),
    })
}

/// Get block timestamp at a specific block height, memoized when a cache is
/// supplied
pub async fn get_block_timestamp(
    gateway: &RpcGateway,
    block_height: u64,
    cache: Option<&BlockTimestampCache>,
) -> Result<i64, RpcError> {
    if let Some(cache) = cache {
        let read_cache = cache.read().await;
        if let Some(&timestamp) = read_cache.get(&block_height) {
            return Ok(timestamp);
        }
    }

    let header = get_block_header(gateway, block_height).await?;

    if let Some(cache) = cache {
        let mut write_cache = cache.write().await;
        write_cache.insert(block_height, header.timestamp_nanos);
    }

    Ok(header.timestamp_nanos)
}

/// Contents of one block relevant to attribution
#[derive(Debug, Default)]
pub struct BlockContents {
    pub receipts: Vec<ReceiptView>,
    pub transactions: Vec<SignedTransactionView>,
}

/// Get all receipts and transactions in a block's chunks.
///
/// Receipt execution happens in a different chunk (often a different block)
/// from where the transaction was submitted, so callers that walk a receipt
/// back to its origin scan the transactions of several preceding blocks.
pub async fn get_block_contents(
    gateway: &RpcGateway,
    block_height: u64,
) -> Result<BlockContents, RpcError> {
    let header = get_block_header(gateway, block_height).await?;
    let client = gateway.json_client()?;

    let mut contents = BlockContents::default();

    for chunk_hash in &header.chunk_hashes {
        let chunk_id: CryptoHash = chunk_hash
            .parse()
            .map_err(|e| RpcError::Rpc(format!("Invalid chunk hash {}: {:?}", chunk_hash, e)))?;

        let chunk_response = match gateway
            .execute("chunk", Some(block_height), None, || {
                client.call(methods::chunk::RpcChunkRequest {
                    chunk_reference: methods::chunk::ChunkReference::ChunkHash { chunk_id },
                })
            })
            .await
        {
            Ok(chunk) => chunk,
            Err(RpcError::RateLimited(msg)) => return Err(RpcError::RateLimited(msg)),
            Err(RpcError::Cancelled) => return Err(RpcError::Cancelled),
            Err(e) => {
                log::warn!("Failed to fetch chunk {}: {}", chunk_hash, e);
                continue;
            }
        };

        contents.receipts.extend(chunk_response.receipts);
        contents.transactions.extend(chunk_response.transactions);
    }

    Ok(contents)
}

/// Get the receipts in a block that involve an account as sender OR receiver
pub async fn get_account_receipts(
    gateway: &RpcGateway,
    account_id: &str,
    block_height: u64,
) -> Result<Vec<ReceiptView>, RpcError> {
    let contents = get_block_contents(gateway, block_height).await?;

    Ok(contents
        .receipts
        .into_iter()
        .filter(|receipt| {
            receipt.receiver_id.as_str() == account_id
                || receipt.predecessor_id.as_str() == account_id
        })
        .collect())
}

/// Get state change causes for an account at a specific block.
///
/// `TransactionProcessing` causes name the signer transaction directly;
/// `ReceiptProcessing` causes require walking the receipt back to its origin.
pub async fn get_account_changes(
    gateway: &RpcGateway,
    account_id: &str,
    block_height: u64,
) -> Result<Vec<StateChangeWithCauseView>, RpcError> {
    let client = gateway.json_client()?;
    let account: near_primitives::types::AccountId = account_id
        .parse()
        .map_err(|e| RpcError::Rpc(format!("Invalid account id {}: {:?}", account_id, e)))?;

    let response = gateway
        .execute(
            "account_changes",
            Some(block_height),
            Some(account_id),
            || {
                client.call(
                    methods::EXPERIMENTAL_changes::RpcStateChangesInBlockByTypeRequest {
                        block_reference: BlockReference::BlockId(BlockId::Height(block_height)),
                        state_changes_request: StateChangesRequestView::AccountChanges {
                            account_ids: vec![account.clone()],
                        },
                    },
                )
            },
        )
        .await?;

    Ok(response.changes)
}

/// Get full transaction details (with receipts) by transaction hash
pub async fn get_transaction(
    gateway: &RpcGateway,
    tx_hash: &str,
    signer_id: &str,
) -> Result<methods::tx::RpcTransactionResponse, RpcError> {
    let client = gateway.json_client()?;

    let tx_hash_crypto: CryptoHash = tx_hash
        .parse()
        .map_err(|e| RpcError::Rpc(format!("Invalid transaction hash {}: {:?}", tx_hash, e)))?;
    let sender_account_id: near_primitives::types::AccountId = signer_id
        .parse()
        .map_err(|e| RpcError::Rpc(format!("Invalid signer id {}: {:?}", signer_id, e)))?;

    gateway
        .execute("tx_status", None, Some(signer_id), || {
            client.call(methods::tx::RpcTransactionStatusRequest {
                transaction_info: methods::tx::TransactionInfo::TransactionId {
                    tx_hash: tx_hash_crypto,
                    sender_account_id: sender_account_id.clone(),
                },
                wait_until: near_primitives::views::TxExecutionStatus::Final,
            })
        })
        .await
}

/// Pick the execution outcome logs of a given executor out of a block-data
/// archive payload. The payload nests outcomes per shard:
/// `shards[].receipt_execution_outcomes[].execution_outcome.outcome.logs`.
pub fn archive_outcome_logs(payload: &serde_json::Value, executor_id: &str) -> Vec<String> {
    let mut logs = Vec::new();

    let Some(shards) = payload.get("shards").and_then(|s| s.as_array()) else {
        return logs;
    };

    for shard in shards {
        let Some(outcomes) = shard
            .get("receipt_execution_outcomes")
            .and_then(|o| o.as_array())
        else {
            continue;
        };

        for outcome in outcomes {
            let executor = outcome
                .pointer("/execution_outcome/outcome/executor_id")
                .and_then(|e| e.as_str());
            if executor != Some(executor_id) {
                continue;
            }
            if let Some(outcome_logs) = outcome
                .pointer("/execution_outcome/outcome/logs")
                .and_then(|l| l.as_array())
            {
                logs.extend(
                    outcome_logs
                        .iter()
                        .filter_map(|l| l.as_str().map(|s| s.to_string())),
                );
            }
        }
    }

    logs
}
