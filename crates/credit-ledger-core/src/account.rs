//! Account credit records.
//!
//! One record per user identity holds the current balance. The record is
//! created lazily by the first spend and only ever changed through a ledger
//! transaction that also appends an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

// ============================================================================
// Constants
// ============================================================================

/// Balance a never-seen account starts with.
pub const FREE_CREDITS: i64 = 5;

/// Balance restored by the monthly free grant.
pub const MONTHLY_GRANT_AMOUNT: i64 = 5;

/// Days that must pass since the newest entry before a free grant is due.
pub const GRANT_COOLDOWN_DAYS: i64 = 30;

/// Credits consumed by one paid action.
pub const SPEND_COST: i64 = 1;

/// The durable balance record of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredits {
    /// The account this record belongs to.
    pub account_id: AccountId,

    /// Current credit balance. Never negative.
    pub balance: i64,

    /// Number of committed mutations. Equals the sequence of the newest
    /// ledger entry and drives optimistic concurrency in the store.
    pub revision: u64,

    /// When the record was first written.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl AccountCredits {
    /// Build the record a never-seen account is materialized with.
    ///
    /// The returned value is not yet persisted and has revision 0.
    #[must_use]
    pub fn seeded(account_id: AccountId, free_credits: i64, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: free_credits,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the balance covers a spend of `cost`.
    #[must_use]
    pub fn has_sufficient_credits(&self, cost: i64) -> bool {
        self.balance >= cost
    }

    /// Return the next revision of this record with a new balance.
    #[must_use]
    pub fn next(&self, balance: i64, now: DateTime<Utc>) -> Self {
        Self {
            account_id: self.account_id.clone(),
            balance,
            revision: self.revision + 1,
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_id() -> AccountId {
        AccountId::new("user-1").unwrap()
    }

    #[test]
    fn seeded_record_starts_at_revision_zero() {
        let now = Utc::now();
        let record = AccountCredits::seeded(account_id(), FREE_CREDITS, now);
        assert_eq!(record.balance, FREE_CREDITS);
        assert_eq!(record.revision, 0);
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn sufficient_credits() {
        let mut record = AccountCredits::seeded(account_id(), 0, Utc::now());
        assert!(record.has_sufficient_credits(0));
        assert!(!record.has_sufficient_credits(1));

        record.balance = 3;
        assert!(record.has_sufficient_credits(3));
        assert!(!record.has_sufficient_credits(4));
    }

    #[test]
    fn next_bumps_revision_and_keeps_creation_time() {
        let created = Utc::now() - chrono::Duration::days(2);
        let record = AccountCredits::seeded(account_id(), 5, created);
        let later = Utc::now();
        let next = record.next(4, later);

        assert_eq!(next.balance, 4);
        assert_eq!(next.revision, 1);
        assert_eq!(next.created_at, created);
        assert_eq!(next.updated_at, later);
    }
}
