use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;

mod balance_changes;
mod monitored_accounts;

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let data_dir = state.store.data_dir();

    if !data_dir.is_dir() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "dataDir": {
                    "path": data_dir.display().to_string(),
                    "available": false
                }
            })),
        ));
    }

    let registered = state.registry.list().await.len();
    let active = state.active_accounts.lock().await.len();

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "dataDir": {
            "path": data_dir.display().to_string(),
            "available": true
        },
        "accounts": {
            "registered": registered,
            "activePipelines": active
        }
    })))
}

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(health_check))
        // Account registration
        .route(
            "/api/accounts",
            get(monitored_accounts::list_accounts).post(monitored_accounts::register_account),
        )
        .route(
            "/api/accounts/{account_id}",
            axum::routing::delete(monitored_accounts::delete_account),
        )
        // Per-account ledger
        .route(
            "/api/accounts/{account_id}/history",
            get(balance_changes::get_account_history),
        )
        .with_state(state)
}
