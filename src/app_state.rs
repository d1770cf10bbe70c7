use near_api::{NetworkConfig, RPCEndpoint};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::Mutex;

use crate::handlers::balance_changes::balance::BalanceOracle;
use crate::handlers::balance_changes::ledger::LedgerStore;
use crate::handlers::balance_changes::transfer_hints::{
    ActivityHintService, fastnear::FastNearProvider, intents_explorer::IntentsExplorerProvider,
};
use crate::registry::AccountRegistry;
use crate::rpc::{RpcGateway, StopSignal};
use crate::utils::env::EnvVars;

pub struct AppState {
    pub http_client: reqwest::Client,
    pub gateway: Arc<RpcGateway>,
    pub oracle: BalanceOracle,
    pub store: LedgerStore,
    pub registry: AccountRegistry,
    pub env_vars: EnvVars,
    /// Optional activity hint service for token discovery
    pub hints: Option<ActivityHintService>,
    /// Single-flight guard: accounts with a pipeline currently running
    pub active_accounts: Mutex<HashSet<String>>,
    /// Graceful shutdown flag; the monitor loop and HTTP server both observe it
    pub shutdown: Arc<AtomicBool>,
}

/// Initialize the application state: archival gateway, balance oracle,
/// ledger store and account registry rooted at the data directory, and the
/// optional hint providers.
pub async fn init_app_state() -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    init_app_state_with(EnvVars::default()).await
}

/// Like `init_app_state`, but with explicit configuration. Used by tests to
/// point the store at a temp directory and disable the hint providers.
pub async fn init_app_state_with(
    env_vars: EnvVars,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    let http_client = reqwest::Client::new();

    let mut endpoint = RPCEndpoint::new(env_vars.near_archival_rpc_url.parse()?);
    if let Some(api_key) = &env_vars.fastnear_api_key {
        endpoint = endpoint.with_api_key(api_key.clone());
    }

    let archival_network = NetworkConfig {
        rpc_endpoints: vec![endpoint],
        ..NetworkConfig::mainnet()
    };

    let mut gateway = RpcGateway::new(archival_network, env_vars.rpc_delay_ms, StopSignal::new());
    if let Some(base_url) = &env_vars.block_archive_base_url {
        gateway = gateway.with_block_archive(http_client.clone(), base_url.clone());
    }
    let gateway = Arc::new(gateway);
    let oracle = BalanceOracle::new(gateway.clone());

    let store = LedgerStore::new(&env_vars.data_dir)?;
    let registry = AccountRegistry::load(store.data_dir())?;

    let hints = if env_vars.transfer_hints_enabled {
        let fastnear_base_url = env_vars
            .transfer_hints_base_url
            .clone()
            .unwrap_or_else(|| "https://transfers.main.fastnear.com".to_string());
        let fastnear = FastNearProvider::with_client(http_client.clone(), fastnear_base_url);
        let intents_explorer = IntentsExplorerProvider::with_client(
            http_client.clone(),
            env_vars.intents_explorer_api_url.clone(),
            env_vars.intents_explorer_api_key.clone(),
        );
        Some(
            ActivityHintService::new()
                .with_provider(fastnear)
                .with_provider(intents_explorer),
        )
    } else {
        None
    };

    Ok(AppState {
        http_client,
        gateway,
        oracle,
        store,
        registry,
        env_vars,
        hints,
        active_accounts: Mutex::new(HashSet::new()),
        shutdown: Arc::new(AtomicBool::new(false)),
    })
}
