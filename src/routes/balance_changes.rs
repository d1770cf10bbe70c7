use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::balance_changes::ledger::{AccountHistory, LedgerError};

/// Return the full ledger document for one account
pub async fn get_account_history(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountHistory>, (StatusCode, Json<Value>)> {
    if !state.store.path_for(&account_id).exists() {
        let registered = state
            .registry
            .list()
            .await
            .iter()
            .any(|a| a.account_id == account_id);
        if !registered {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Account not registered" })),
            ));
        }
    }

    match state.store.load(&account_id) {
        Ok(history) => Ok(Json(history)),
        Err(e @ LedgerError::Malformed { .. }) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to load ledger: {}", e) })),
        )),
    }
}
