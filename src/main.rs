use axum::Router;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tower_http::cors::{Any, CorsLayer};

use na_be::handlers::balance_changes::account_monitor;
use na_be::{init_app_state, routes};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let state = Arc::new(
        init_app_state()
            .await
            .expect("Failed to initialize application state"),
    );

    let monitor_handle = if state.env_vars.disable_balance_monitoring {
        log::warn!("Balance monitoring disabled by DISABLE_BALANCE_MONITORING");
        None
    } else {
        Some(tokio::spawn(account_monitor::run_monitor_loop(
            state.clone(),
        )))
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::create_routes(state.clone()))
        .layer(cors);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3002".to_string());
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    log::info!("Server running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .expect("Server error");

    // The monitor observes the shutdown flag, finishes its current RPC call
    // and saves the ledger before unwinding
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }

    log::info!("Shutdown complete");
}

async fn shutdown_signal(state: Arc<na_be::AppState>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");

    log::info!("Shutdown requested, unwinding");
    state.shutdown.store(true, Ordering::SeqCst);
    state.gateway.stop_signal().set();
}
