#[derive(Clone, Debug)]
pub struct EnvVars {
    pub near_archival_rpc_url: String,
    pub fastnear_api_key: Option<String>,
    /// Minimum delay between successive archival RPC calls
    pub rpc_delay_ms: u64,
    /// Max entries inserted per pass per direction
    pub batch_size: usize,
    /// Sleep between monitor cycles
    pub cycle_delay_ms: u64,
    /// Upper bound on backward search depth per cycle, in epochs
    pub max_epochs_per_cycle: u64,
    /// Hard cap on one account's processing in a cycle
    pub account_timeout_ms: u64,
    /// Root for per-account ledger files and the registry
    pub data_dir: String,
    pub disable_balance_monitoring: bool,
    // Activity hints configuration (FastNear transfers-api)
    pub transfer_hints_enabled: bool,
    pub transfer_hints_base_url: Option<String>, // Override FastNear API URL for testing
    // Intents Explorer API configuration
    pub intents_explorer_api_url: String,
    pub intents_explorer_api_key: Option<String>,
    // Optional block-data archive for receipt execution outcomes
    pub block_archive_base_url: Option<String>,
}

impl Default for EnvVars {
    fn default() -> Self {
        Self {
            near_archival_rpc_url: std::env::var("NEAR_ARCHIVAL_RPC_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://archival-rpc.mainnet.fastnear.com/".to_string()),
            fastnear_api_key: std::env::var("FASTNEAR_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            rpc_delay_ms: std::env::var("RPC_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            batch_size: std::env::var("BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            cycle_delay_ms: std::env::var("CYCLE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),
            max_epochs_per_cycle: std::env::var("MAX_EPOCHS_PER_CYCLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            account_timeout_ms: std::env::var("ACCOUNT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300_000),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            disable_balance_monitoring: std::env::var("DISABLE_BALANCE_MONITORING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            transfer_hints_enabled: std::env::var("TRANSFER_HINTS_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            transfer_hints_base_url: std::env::var("TRANSFER_HINTS_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            intents_explorer_api_url: std::env::var("INTENTS_EXPLORER_API_URL")
                .unwrap_or_else(|_| "https://explorer.near-intents.org/api/v0".to_string()),
            intents_explorer_api_key: std::env::var("INTENTS_EXPLORER_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            block_archive_base_url: std::env::var("BLOCK_ARCHIVE_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}
