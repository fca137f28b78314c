//! Operator handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{AccountId, CreditKind, Principal, Reconciliation};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::credits::EntryResponse;
use crate::ledger::CreditReceipt;
use crate::state::AppState;

/// Admin grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Account to credit.
    pub account_id: String,
    /// Credits to add.
    pub amount: i64,
    /// Reason for the grant (audit log only).
    #[serde(default)]
    pub reason: Option<String>,
}

/// Credit response, shared with the payment callback.
#[derive(Debug, Serialize)]
pub struct CreditResponse {
    /// The credited account.
    pub account_id: String,
    /// Current balance.
    pub balance: i64,
    /// The entry applied (or the original one for a replay).
    pub entry: EntryResponse,
    /// Whether the payment reference had already been applied.
    pub duplicate: bool,
}

impl CreditResponse {
    /// Build the response for a credit receipt.
    #[must_use]
    pub fn new(account_id: &AccountId, receipt: &CreditReceipt) -> Self {
        Self {
            account_id: account_id.to_string(),
            balance: receipt.balance,
            entry: EntryResponse::from(&receipt.entry),
            duplicate: receipt.duplicate,
        }
    }
}

/// Grant credits to an existing account.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<CreditResponse>, ApiError> {
    let account_id = AccountId::new(body.account_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid account_id: {e}")))?;

    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %account_id,
        amount = body.amount,
        reason = body.reason.as_deref().unwrap_or(""),
        "Admin credit grant"
    );

    let receipt = state
        .ledger
        .credit(
            &Principal::authenticated(account_id.clone()),
            body.amount,
            CreditKind::AdminGrant,
            None,
        )
        .await?;

    Ok(Json(CreditResponse::new(&account_id, &receipt)))
}

/// Replay an account's log against its stored balance.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(account_id): Path<String>,
) -> Result<Json<Reconciliation>, ApiError> {
    let account_id = AccountId::new(account_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid account_id: {e}")))?;

    let report = state.ledger.reconcile(&account_id)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %account_id,
        consistent = report.is_consistent(),
        "Reconciliation run"
    );

    Ok(Json(report))
}
