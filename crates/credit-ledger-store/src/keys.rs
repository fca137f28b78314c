//! Key encoding utilities for `RocksDB`.
//!
//! Account IDs are variable length, so every key starts with a one-byte
//! length prefix. This keeps prefix scans for `"ab"` from matching `"abc"`.

use credit_ledger_core::AccountId;

/// Create the key prefix shared by everything stored for an account.
///
/// Format: `len (1 byte) || account_id`
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    let bytes = account_id.as_bytes();
    let mut key = Vec::with_capacity(1 + bytes.len() + 8);
    // AccountId is at most 128 bytes.
    key.push(u8::try_from(bytes.len()).unwrap_or(u8::MAX));
    key.extend_from_slice(bytes);
    key
}

/// Create an account record key.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_prefix(account_id)
}

/// Create a ledger entry key.
///
/// Format: `account_prefix || sequence (8 bytes, big-endian)`
///
/// Big-endian sequences make a forward scan chronological.
#[must_use]
pub fn entry_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Create a payment reference key.
///
/// Format: `account_prefix || reference`
#[must_use]
pub fn reference_key(account_id: &AccountId, reference: &str) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(reference.as_bytes());
    key
}
