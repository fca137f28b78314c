//! Request and response types for the ledger client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use credit_ledger_core::{LedgerAction, Reconciliation};

/// Current balance of the caller's account.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Account ID.
    pub account_id: String,
    /// Balance in credits.
    pub balance: i64,
    /// Record revision (0 for an account that was never written).
    pub revision: u64,
    /// Whether this read applied the monthly grant.
    pub granted: bool,
}

/// One ledger entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    /// Entry ID.
    pub id: String,
    /// Position in the account's log, starting at 1.
    pub sequence: u64,
    /// What caused the change.
    pub action: LedgerAction,
    /// Credits spent; negative for grants and purchases.
    pub delta: i64,
    /// Balance after this entry.
    pub balance_after: i64,
    /// Payment reference, for purchases.
    #[serde(default)]
    pub reference: Option<String>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Result of a successful spend.
#[derive(Debug, Clone, Deserialize)]
pub struct SpendResponse {
    /// Balance after the spend.
    pub balance: i64,
    /// The entry written.
    pub entry: Entry,
}

/// A page of history, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct EntriesPage {
    /// Entries on this page.
    pub entries: Vec<Entry>,
    /// Whether older entries exist past this page.
    pub has_more: bool,
}

/// Operator grant request.
#[derive(Debug, Clone, Serialize)]
pub struct GrantCreditsRequest {
    /// Account to credit.
    pub account_id: String,
    /// Credits to add.
    pub amount: i64,
    /// Audit note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of a credit.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditResponse {
    /// The credited account.
    pub account_id: String,
    /// Balance after the credit.
    pub balance: i64,
    /// The entry applied.
    pub entry: Entry,
    /// Whether the credit had already been applied.
    pub duplicate: bool,
}

/// API error envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// API error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
