//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The balance does not cover the requested spend.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Credits the operation needs.
        required: i64,
    },

    /// The caller is anonymous or not signed in.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The target account has no credit record.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account that was not found.
        account_id: String,
    },

    /// The store could not complete the transaction. The operation may be
    /// retried after re-reading the balance.
    #[error("ledger unavailable after {attempts} attempt(s): {reason}")]
    LedgerUnavailable {
        /// Transaction attempts made.
        attempts: u32,
        /// Last failure seen.
        reason: String,
    },

    /// Amount or cost outside the accepted range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl LedgerError {
    /// Stable machine-readable code, shared by the HTTP API and client.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Unauthenticated => "unauthenticated",
            Self::AccountNotFound { .. } => "account_not_found",
            Self::LedgerUnavailable { .. } => "ledger_unavailable",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidId(_) => "invalid_id",
        }
    }
}
