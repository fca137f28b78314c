//! Storage layer for the credit ledger.
//!
//! This crate provides the balance store and the ledger entry log behind one
//! trait, plus the optimistic transaction primitive every mutation runs
//! through.
//!
//! # Architecture
//!
//! A mutation reads an [`AccountSnapshot`], decides on a [`LedgerWrite`] and
//! commits it conditioned on the snapshot's revision. A concurrent commit makes
//! the condition fail with [`StoreError::Conflict`] and [`txn::transact`] re-runs
//! the decision, up to the bound in [`RetryPolicy`].
//!
//! Backends:
//!
//! - [`MemoryStore`]: process-local, per-account locking inside the store
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` optimistic transactions
//!   over the column families in [`schema`]
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger_store::{MemoryStore, Store};
//! use credit_ledger_core::AccountId;
//!
//! let store = MemoryStore::new();
//! let account_id = AccountId::new("user-1").unwrap();
//!
//! // Nothing is stored until the first mutation.
//! assert!(store.get_account(&account_id).unwrap().is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod hub;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;
pub mod txn;

pub use error::{Result, StoreError};
pub use hub::{BalanceHub, BalanceSubscription, BalanceUpdate};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;
pub use txn::{transact, Decision, RetryPolicy, TxnError};

use credit_ledger_core::{AccountCredits, AccountId, LedgerEntry};

/// The state a transaction decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    /// The account read.
    pub account_id: AccountId,
    /// The balance record, if the account was ever mutated.
    pub record: Option<AccountCredits>,
    /// The newest ledger entry.
    pub latest_entry: Option<LedgerEntry>,
}

impl AccountSnapshot {
    /// The revision a commit based on this snapshot must find.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.record.as_ref().map_or(0, |record| record.revision)
    }
}

/// A balance update and its ledger entry, committed together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerWrite {
    /// Revision the record must still have for the write to apply.
    pub expected_revision: u64,
    /// The new record state.
    pub record: AccountCredits,
    /// The entry describing the change.
    pub entry: LedgerEntry,
}

impl LedgerWrite {
    /// Check the invariants every backend relies on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWrite`] if the record and entry disagree or
    /// the balance would be negative.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(StoreError::InvalidWrite(msg.to_string()));

        if self.record.balance < 0 {
            return invalid("balance would be negative");
        }
        if self.record.revision != self.expected_revision + 1 {
            return invalid("record revision must advance by one");
        }
        if self.entry.sequence != self.record.revision {
            return invalid("entry sequence must equal record revision");
        }
        if self.entry.account_id != self.record.account_id {
            return invalid("entry and record belong to different accounts");
        }
        if self.entry.balance_after != self.record.balance {
            return invalid("entry balance_after must equal record balance");
        }
        Ok(())
    }

    /// The observation subscribers receive once this write commits.
    #[must_use]
    pub fn balance_update(&self) -> BalanceUpdate {
        BalanceUpdate {
            balance: Some(self.record.balance),
            revision: self.record.revision,
        }
    }
}

/// The storage trait defining all ledger database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Balance Store
    // =========================================================================

    /// Get an account record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountCredits>>;

    /// Read the record and newest entry for a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot>;

    /// Subscribe to balance changes of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the current balance cannot be read.
    fn subscribe(&self, account_id: &AccountId) -> Result<BalanceSubscription>;

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Atomically write a record and append its entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if the record revision moved on.
    /// - `StoreError::DuplicateReference` if the entry's payment reference was
    ///   already applied.
    /// - `StoreError::InvalidWrite` if the write fails [`LedgerWrite::validate`].
    fn commit(&self, write: &LedgerWrite) -> Result<()>;

    /// Delete an account record together with its entries and references.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account has no record.
    fn delete_account(&self, account_id: &AccountId) -> Result<()>;

    // =========================================================================
    // Ledger Entry Log
    // =========================================================================

    /// List entries newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// All entries of an account in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>>;

    /// Find the entry that applied a payment reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_reference(&self, account_id: &AccountId, reference: &str)
        -> Result<Option<LedgerEntry>>;
}
