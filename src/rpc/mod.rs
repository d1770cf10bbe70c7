//! RPC Gateway
//!
//! Single point of egress to the archival NEAR node. All RPC operations used by
//! the balance change engine go through this gateway, which enforces:
//! - a minimum delay between consecutive calls (the archival provider is rate limited)
//! - rate-limit detection that raises a process-wide stop signal
//! - retry with exponential backoff on transient transport errors
//!
//! Missing-block fallback (querying `height - 1` when the node skipped a block)
//! is handled by the per-asset balance query functions, which know how many
//! attempts make sense for their call shape.

use near_api::{NetworkConfig, RPCEndpoint};
use near_jsonrpc_client::{JsonRpcClient, auth};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};

const MAX_TRANSPORT_RETRIES: u32 = 3;

/// Maximum number of `height - 1` attempts when the node reports a skipped block
pub const MAX_BLOCK_FALLBACK: u64 = 10;

/// Process-wide cooperative stop signal.
///
/// Set when the archival node reports a rate limit; every gateway call fails
/// fast with `RpcError::Cancelled` until the signal is cleared at the next
/// monitor cycle boundary. Also set on graceful shutdown so in-flight
/// pipelines unwind at their next RPC boundary.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Error taxonomy for archival RPC operations
#[derive(Debug)]
pub enum RpcError {
    /// The node reported 429 / "Too Many Requests"; the stop signal has been set
    RateLimited(String),
    /// The stop signal was already set when the call was attempted
    Cancelled,
    /// The requested block was skipped or is not available on this node
    UnknownBlock { height: u64, message: String },
    /// The account does not exist at the queried block
    UnknownAccount { account_id: String },
    /// The contract is not deployed or does not expose the called method
    MissingMethod { message: String },
    /// Transient network failure that survived the retry budget
    Transport(String),
    /// Any other node-side error
    Rpc(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::RateLimited(msg) => write!(f, "RPC rate limited: {}", msg),
            RpcError::Cancelled => write!(f, "RPC call cancelled by stop signal"),
            RpcError::UnknownBlock { height, message } => {
                write!(f, "Block {} not available: {}", height, message)
            }
            RpcError::UnknownAccount { account_id } => {
                write!(f, "Account {} does not exist at the queried block", account_id)
            }
            RpcError::MissingMethod { message } => {
                write!(f, "Contract or method not available: {}", message)
            }
            RpcError::Transport(msg) => write!(f, "RPC transport error: {}", msg),
            RpcError::Rpc(msg) => write!(f, "RPC error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Check if an error string indicates the node rejected us for rate limiting
pub fn is_rate_limit_error(err_str: &str) -> bool {
    err_str.contains("429")
        || err_str.contains("rate limit")
        || err_str.contains("Too Many Requests")
}

/// Check if an error string indicates a skipped or unavailable block
pub fn is_unknown_block_error(err_str: &str) -> bool {
    err_str.contains("422") || err_str.contains("UnknownBlock") || err_str.contains("UNKNOWN_BLOCK")
}

/// Check if an error string indicates the queried account does not exist
pub fn is_unknown_account_error(err_str: &str) -> bool {
    err_str.contains("UNKNOWN_ACCOUNT")
        || err_str.contains("UnknownAccount")
        || err_str.contains("does not exist while viewing")
}

/// Check if an error string indicates a missing contract or view method
pub fn is_missing_method_error(err_str: &str) -> bool {
    err_str.contains("MethodNotFound")
        || err_str.contains("CodeDoesNotExist")
        || err_str.contains("ContractCodeNotFound")
        || err_str.contains("doesn't exist")
}

/// Check if an error string is a transient transport/network error
pub fn is_transport_error(err_str: &str) -> bool {
    err_str.contains("TransportError")
        || err_str.contains("SendError")
        || err_str.contains("DispatchGone")
        || err_str.contains("sending payload")
        || err_str.contains("error sending request")
        || err_str.contains("connection")
        || err_str.contains("timed out")
}

fn classify(err_str: String, height: Option<u64>, account_id: Option<&str>) -> RpcError {
    if is_rate_limit_error(&err_str) {
        RpcError::RateLimited(err_str)
    } else if is_unknown_block_error(&err_str) {
        RpcError::UnknownBlock {
            height: height.unwrap_or_default(),
            message: err_str,
        }
    } else if is_unknown_account_error(&err_str) {
        RpcError::UnknownAccount {
            account_id: account_id.unwrap_or_default().to_string(),
        }
    } else if is_missing_method_error(&err_str) {
        RpcError::MissingMethod { message: err_str }
    } else if is_transport_error(&err_str) {
        RpcError::Transport(err_str)
    } else {
        RpcError::Rpc(err_str)
    }
}

/// Serialized access point for the archival node.
///
/// Not internally parallel: the monitor processes one account pipeline at a
/// time, and within a pipeline all operations are sequential. The pacing clock
/// is still a mutex so that route handlers issuing ad-hoc queries share the
/// same budget.
pub struct RpcGateway {
    network: NetworkConfig,
    stop: StopSignal,
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
    block_archive: Option<(reqwest::Client, String)>,
}

impl RpcGateway {
    pub fn new(network: NetworkConfig, min_delay_ms: u64, stop: StopSignal) -> Self {
        Self {
            network,
            stop,
            min_delay: Duration::from_millis(min_delay_ms),
            last_call: Mutex::new(None),
            block_archive: None,
        }
    }

    /// Configure the public block-data archive used as a fallback source for
    /// receipt execution outcomes
    pub fn with_block_archive(mut self, http_client: reqwest::Client, base_url: String) -> Self {
        self.block_archive = Some((http_client, base_url));
        self
    }

    pub fn has_block_archive(&self) -> bool {
        self.block_archive.is_some()
    }

    /// Fetch the full block payload (receipts + execution outcomes) from the
    /// block-data archive. Counts against the pacing budget like any other
    /// remote call.
    pub async fn fetch_archive_block(
        &self,
        block_height: u64,
    ) -> Result<serde_json::Value, RpcError> {
        let Some((client, base_url)) = &self.block_archive else {
            return Err(RpcError::Rpc("No block archive configured".to_string()));
        };

        self.pace().await?;

        let url = format!("{}/v0/block/{}", base_url.trim_end_matches('/'), block_height);
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(classify(
                format!("Block archive error for block {}: {}", block_height, status),
                Some(block_height),
                None,
            ));
        }

        response
            .json()
            .await
            .map_err(|e| RpcError::Rpc(format!("Invalid block archive payload: {}", e)))
    }

    /// The archival network configuration, for near-api query builders
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Build a raw JSON-RPC client against the gateway's endpoint, carrying the
    /// bearer key when one is configured. Used for methods near-api does not
    /// wrap (chunk, EXPERIMENTAL_changes, EXPERIMENTAL_tx_status).
    pub fn json_client(&self) -> Result<JsonRpcClient, RpcError> {
        let rpc_endpoint: &RPCEndpoint = self
            .network
            .rpc_endpoints
            .first()
            .ok_or_else(|| RpcError::Rpc("No RPC endpoint configured".to_string()))?;

        let mut client = JsonRpcClient::connect(rpc_endpoint.url.as_str());

        if let Some(bearer) = &rpc_endpoint.bearer_header {
            // bearer_header already includes "Bearer " prefix from with_api_key()
            let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer);
            client = client.header(
                auth::Authorization::bearer(token)
                    .map_err(|e| RpcError::Rpc(format!("Invalid bearer token: {}", e)))?,
            );
        }

        Ok(client)
    }

    /// Wait out the pacing delay, failing fast when the stop signal is set
    async fn pace(&self) -> Result<(), RpcError> {
        if self.stop.is_set() {
            return Err(RpcError::Cancelled);
        }

        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());

        Ok(())
    }

    /// Run one RPC operation through the gateway.
    ///
    /// Applies pacing, classifies errors into the gateway taxonomy, retries
    /// transient transport errors with exponential backoff, and sets the stop
    /// signal on rate limiting. `height` and `account_id` give classification
    /// context for UnknownBlock / UnknownAccount errors.
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        height: Option<u64>,
        account_id: Option<&str>,
        mut make_call: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        for attempt in 0..=MAX_TRANSPORT_RETRIES {
            self.pace().await?;

            match make_call().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let err = classify(format!("{:?}", e), height, account_id);
                    match err {
                        RpcError::Transport(msg) if attempt < MAX_TRANSPORT_RETRIES => {
                            let delay_ms = 200 * 2u64.pow(attempt);
                            log::warn!(
                                "{}: transport error ({}), retrying in {}ms (attempt {}/{})",
                                label,
                                msg,
                                delay_ms,
                                attempt + 1,
                                MAX_TRANSPORT_RETRIES + 1
                            );
                            sleep(Duration::from_millis(delay_ms)).await;
                            continue;
                        }
                        RpcError::RateLimited(msg) => {
                            log::error!("{}: rate limited, raising stop signal: {}", label, msg);
                            self.stop.set();
                            return Err(RpcError::RateLimited(msg));
                        }
                        other => return Err(other),
                    }
                }
            }
        }
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_lifecycle() {
        let signal = StopSignal::new();
        assert!(!signal.is_set());

        signal.set();
        assert!(signal.is_set());

        // Clones observe the same underlying flag
        let clone = signal.clone();
        assert!(clone.is_set());

        clone.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_rate_limit_classification() {
        assert!(is_rate_limit_error("status 429 Too Many Requests"));
        assert!(is_rate_limit_error("rate limit exceeded"));
        assert!(!is_rate_limit_error("UnknownBlock"));
    }

    #[test]
    fn test_unknown_block_classification() {
        assert!(is_unknown_block_error("422 Unprocessable Entity"));
        assert!(is_unknown_block_error("UnknownBlock { ... }"));
        assert!(!is_unknown_block_error("UNKNOWN_ACCOUNT"));
    }

    #[test]
    fn test_unknown_account_classification() {
        assert!(is_unknown_account_error("UNKNOWN_ACCOUNT"));
        assert!(is_unknown_account_error(
            "account test.near does not exist while viewing"
        ));
        assert!(!is_unknown_account_error("429"));
    }

    #[test]
    fn test_classify_priority() {
        let err = classify("429 rate limit".to_string(), None, None);
        assert!(matches!(err, RpcError::RateLimited(_)));

        let err = classify("UnknownBlock".to_string(), Some(100), None);
        assert!(matches!(err, RpcError::UnknownBlock { height: 100, .. }));

        let err = classify("UNKNOWN_ACCOUNT".to_string(), None, Some("test.near"));
        match err {
            RpcError::UnknownAccount { account_id } => assert_eq!(account_id, "test.near"),
            other => panic!("Expected UnknownAccount, got {:?}", other),
        }

        let err = classify("something else".to_string(), None, None);
        assert!(matches!(err, RpcError::Rpc(_)));
    }

    #[tokio::test]
    async fn test_execute_fails_fast_when_stopped() {
        let stop = StopSignal::new();
        stop.set();

        let gateway = RpcGateway::new(NetworkConfig::mainnet(), 0, stop);

        let result: Result<u32, RpcError> = gateway
            .execute("test", None, None, || async { Ok::<u32, String>(42) })
            .await;

        assert!(matches!(result, Err(RpcError::Cancelled)));
    }

    #[tokio::test]
    async fn test_execute_sets_stop_signal_on_rate_limit() {
        let stop = StopSignal::new();
        let gateway = RpcGateway::new(NetworkConfig::mainnet(), 0, stop.clone());

        let result: Result<u32, RpcError> = gateway
            .execute("test", None, None, || async {
                Err::<u32, String>("429 Too Many Requests".to_string())
            })
            .await;

        assert!(matches!(result, Err(RpcError::RateLimited(_))));
        assert!(stop.is_set());
    }

    #[tokio::test]
    async fn test_execute_passes_through_success() {
        let gateway = RpcGateway::new(NetworkConfig::mainnet(), 0, StopSignal::new());

        let result: Result<u32, RpcError> = gateway
            .execute("test", None, None, || async { Ok::<u32, String>(7) })
            .await;

        assert_eq!(result.unwrap(), 7);
    }
}
