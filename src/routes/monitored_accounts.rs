use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use near_account_id::AccountId;
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;

use crate::AppState;
use crate::registry::RegisteredAccount;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountRequest {
    pub account_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// Register an account for continuous balance monitoring
pub async fn register_account(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterAccountRequest>,
) -> Result<Json<RegisteredAccount>, (StatusCode, Json<Value>)> {
    if AccountId::from_str(&payload.account_id).is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid account id",
                "message": format!("'{}' is not a valid NEAR account id", payload.account_id)
            })),
        ));
    }

    let account = state
        .registry
        .register(&payload.account_id, payload.enabled, payload.expires_at)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Registry error: {}", e) })),
            )
        })?;

    Ok(Json(account))
}

/// List registered accounts with their sync metadata
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<RegisteredAccount>> {
    Json(state.registry.list().await)
}

/// Remove an account registration (its ledger file stays on disk)
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let removed = state.registry.remove(&account_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Registry error: {}", e) })),
        )
    })?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Account not found" })),
        ))
    }
}
