//! Identifier types for the credit ledger.
//!
//! Account identifiers are opaque strings issued by the authentication
//! provider. Entry identifiers are ULIDs so that they sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Longest account identifier accepted, in bytes.
pub const MAX_ACCOUNT_ID_LEN: usize = 128;

/// An account identifier (the `sub` claim of the user's ID token).
///
/// The ledger never interprets the value; it only requires that it is usable
/// as a storage key: non-empty, at most [`MAX_ACCOUNT_ID_LEN`] bytes, free of
/// `/`, and not `.` or `..`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account identifier.
    ///
    /// # Errors
    ///
    /// Returns an [`IdError`] if the value cannot be used as a record key.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > MAX_ACCOUNT_ID_LEN {
            return Err(IdError::TooLong { len: value.len() });
        }
        if value.contains('/') || value == "." || value == ".." {
            return Err(IdError::InvalidAccountId);
        }
        Ok(Self(value))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the identifier bytes (used for storage keys).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for AccountId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A ledger entry identifier using ULID for time-ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(Ulid);

impl EntryId {
    /// Generate a new `EntryId` with the current timestamp.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Return the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.0
    }
}

impl FromStr for EntryId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntryId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The account identifier is empty.
    #[error("account id is empty")]
    Empty,

    /// The account identifier exceeds [`MAX_ACCOUNT_ID_LEN`].
    #[error("account id is {len} bytes, limit is 128")]
    TooLong {
        /// Length of the rejected value in bytes.
        len: usize,
    },

    /// The account identifier contains characters not allowed in a key.
    #[error("account id is not a valid record key")]
    InvalidAccountId,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_accepts_provider_uids() {
        let id = AccountId::new("kX3v9QpZ0bTq2n8mYwL1aR7cD4e2").unwrap();
        assert_eq!(id.as_str(), "kX3v9QpZ0bTq2n8mYwL1aR7cD4e2");
        assert_eq!(id.to_string(), "kX3v9QpZ0bTq2n8mYwL1aR7cD4e2");
    }

    #[test]
    fn account_id_rejects_unusable_keys() {
        assert_eq!(AccountId::new(""), Err(IdError::Empty));
        assert_eq!(AccountId::new("a/b"), Err(IdError::InvalidAccountId));
        assert_eq!(AccountId::new(".."), Err(IdError::InvalidAccountId));
        assert!(matches!(
            AccountId::new("x".repeat(MAX_ACCOUNT_ID_LEN + 1)),
            Err(IdError::TooLong { .. })
        ));
        assert!(AccountId::new("x".repeat(MAX_ACCOUNT_ID_LEN)).is_ok());
    }

    #[test]
    fn account_id_serde_validates() {
        let parsed: AccountId = serde_json::from_str("\"user-1\"").unwrap();
        assert_eq!(parsed.as_str(), "user-1");
        assert!(serde_json::from_str::<AccountId>("\"\"").is_err());
    }

    #[test]
    fn entry_id_parse_rejects_garbage() {
        assert_eq!("not-a-ulid".parse::<EntryId>(), Err(IdError::InvalidUlid));
        let id = EntryId::generate();
        assert_eq!(id.to_string().parse::<EntryId>().unwrap(), id);
    }
}
