use bigdecimal::BigDecimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Once};
use tempfile::TempDir;

use na_be::handlers::balance_changes::ledger::LedgerEntry;
use na_be::handlers::balance_changes::snapshot::{BalanceSnapshot, EntryChanges};
use na_be::utils::env::EnvVars;
use na_be::{AppState, init_app_state_with, routes};

static INIT: Once = Once::new();

/// Load test environment variables. Safe to call multiple times - only runs once.
pub fn load_test_env() {
    INIT.call_once(|| {
        dotenvy::from_filename(".env").ok();
        dotenvy::from_filename_override(".env.test").ok();
    });
}

/// Configuration for tests: ledger store in a temp directory, background
/// monitoring and hint providers off
pub fn test_env_vars(data_dir: &std::path::Path) -> EnvVars {
    load_test_env();
    EnvVars {
        data_dir: data_dir.display().to_string(),
        disable_balance_monitoring: true,
        transfer_hints_enabled: false,
        ..EnvVars::default()
    }
}

/// Build an AppState rooted at a fresh temp directory
pub async fn init_test_state() -> (Arc<AppState>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let state = init_app_state_with(test_env_vars(dir.path()))
        .await
        .expect("Failed to initialize test state");
    (Arc::new(state), dir)
}

/// In-process HTTP server over the real router
pub struct TestServer {
    pub state: Arc<AppState>,
    addr: SocketAddr,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let (state, dir) = init_test_state().await;

        let app = routes::create_routes(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        TestServer {
            state,
            addr,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// A native-only ledger entry with the given before/after balances
pub fn native_entry(block: u64, before: &str, after: &str) -> LedgerEntry {
    LedgerEntry {
        block,
        transaction_block: block,
        timestamp: block as i64 * 1_000_000_000,
        transaction_hashes: vec![format!("tx-{}", block)],
        transfers: vec![],
        balance_before: BalanceSnapshot {
            native: Some(dec(before)),
            ..Default::default()
        },
        balance_after: BalanceSnapshot {
            native: Some(dec(after)),
            ..Default::default()
        },
        changes: EntryChanges {
            native_changed: true,
            native_diff: Some(dec(after) - dec(before)),
            ..Default::default()
        },
        verification_with_prev: None,
        verification_with_next: None,
    }
}

/// An intents-token entry for one token id
pub fn intents_entry(block: u64, token: &str, before: &str, after: &str) -> LedgerEntry {
    use na_be::handlers::balance_changes::snapshot::BalanceDelta;

    LedgerEntry {
        block,
        transaction_block: block,
        timestamp: block as i64 * 1_000_000_000,
        transaction_hashes: vec![format!("tx-{}", block)],
        transfers: vec![],
        balance_before: BalanceSnapshot {
            intents_tokens: [(token.to_string(), dec(before))].into(),
            ..Default::default()
        },
        balance_after: BalanceSnapshot {
            intents_tokens: [(token.to_string(), dec(after))].into(),
            ..Default::default()
        },
        changes: EntryChanges {
            intents_changed: [(
                token.to_string(),
                BalanceDelta {
                    start: dec(before),
                    end: dec(after),
                    diff: dec(after) - dec(before),
                },
            )]
            .into(),
            ..Default::default()
        },
        verification_with_prev: None,
        verification_with_next: None,
    }
}
