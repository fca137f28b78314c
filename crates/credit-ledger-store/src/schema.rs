//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account credit records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger entries, keyed by `account_id || sequence`.
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Applied payment references, keyed by `account_id || reference`.
    /// Value is the big-endian sequence of the entry that applied it.
    pub const PAYMENT_REFERENCES: &str = "payment_references";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ACCOUNTS, cf::LEDGER_ENTRIES, cf::PAYMENT_REFERENCES]
}
