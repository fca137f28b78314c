//! Credit balance, spend and history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::LedgerEntry;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::BalanceView;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The account.
    pub account_id: String,
    /// Effective balance in credits.
    pub balance: i64,
    /// Record revision (0 before the first write).
    pub revision: u64,
    /// Whether this read applied the monthly grant.
    pub granted: bool,
}

impl BalanceResponse {
    /// Build the response for an observed balance.
    #[must_use]
    pub fn new(account_id: &str, view: &BalanceView) -> Self {
        Self {
            account_id: account_id.to_string(),
            balance: view.balance,
            revision: view.revision,
            granted: view.granted,
        }
    }
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let view = state.ledger.balance(&auth.principal).await?;

    Ok(Json(BalanceResponse::new(
        auth.principal.account_id.as_str(),
        &view,
    )))
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: String,
    /// Position in the account's log.
    pub sequence: u64,
    /// What caused the change.
    pub action: String,
    /// Credits spent (negative when credits were added).
    pub delta: i64,
    /// Balance after this entry.
    pub balance_after: i64,
    /// Payment reference, for purchases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for EntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            sequence: entry.sequence,
            action: entry.action.as_str().to_string(),
            delta: entry.delta,
            balance_after: entry.balance_after,
            reference: entry.reference.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Spend response.
#[derive(Debug, Serialize)]
pub struct SpendResponse {
    /// Balance after the spend.
    pub balance: i64,
    /// The entry written.
    pub entry: EntryResponse,
}

/// Spend the configured cost of one paid action.
pub async fn spend(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SpendResponse>, ApiError> {
    let cost = state.ledger.config().spend_cost;
    let receipt = state.ledger.spend(&auth.principal, cost).await?;

    Ok(Json(SpendResponse {
        balance: receipt.balance,
        entry: EntryResponse::from(&receipt.entry),
    }))
}

/// Entry list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    /// Maximum number of entries to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List entries response.
#[derive(Debug, Serialize)]
pub struct ListEntriesResponse {
    /// Entries (newest first).
    pub entries: Vec<EntryResponse>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List ledger history.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<ListEntriesResponse>, ApiError> {
    let page = state
        .ledger
        .entries(&auth.principal, query.limit, query.offset)?;

    Ok(Json(ListEntriesResponse {
        entries: page.entries.iter().map(EntryResponse::from).collect(),
        has_more: page.has_more,
    }))
}
