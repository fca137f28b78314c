//! Account handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Erase the current user's credit record, history and payment references.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.ledger.erase(&auth.principal).await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}
