//! Error types for ledger storage.

use credit_ledger_core::{AccountId, LedgerEntry};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another transaction committed to the account since the snapshot.
    #[error("write conflict on account {account_id}")]
    Conflict {
        /// The contended account.
        account_id: AccountId,
    },

    /// The payment reference was already applied to this account.
    #[error("duplicate payment reference: {reference}")]
    DuplicateReference {
        /// The replayed reference.
        reference: String,
        /// The entry written when the reference was first applied.
        entry: Box<LedgerEntry>,
    },

    /// The write violates a ledger invariant and was not applied.
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// Record not found.
    #[error("account not found: {0}")]
    NotFound(AccountId),
}

impl StoreError {
    /// Whether re-running the transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Database(_))
    }
}
