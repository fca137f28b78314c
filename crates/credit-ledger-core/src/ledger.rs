//! Ledger entry types.
//!
//! Every balance change appends exactly one immutable entry. Entries use the
//! spend-positive convention: `delta` is the number of credits spent, so a
//! grant or purchase is stored as a negative delta and
//! `balance_after = balance_before - delta`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountCredits, AccountId, EntryId};

/// What caused a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    /// First-use materialization of an account, net of the spend that
    /// triggered it.
    InitialGrant,

    /// Credits consumed by a paid action.
    Spend,

    /// Credits bought through the payment provider.
    Purchase,

    /// Credits granted by an operator.
    AdminGrant,

    /// Free replenishment after the cooldown window.
    MonthlyGrant,
}

impl LedgerAction {
    /// Stable wire name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InitialGrant => "initial_grant",
            Self::Spend => "spend",
            Self::Purchase => "purchase",
            Self::AdminGrant => "admin_grant",
            Self::MonthlyGrant => "monthly_grant",
        }
    }
}

/// Out-of-band credit sources accepted by the credit mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    /// A confirmed payment.
    Purchase,
    /// An operator grant.
    AdminGrant,
}

impl From<CreditKind> for LedgerAction {
    fn from(kind: CreditKind) -> Self {
        match kind {
            CreditKind::Purchase => Self::Purchase,
            CreditKind::AdminGrant => Self::AdminGrant,
        }
    }
}

/// One immutable record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID.
    pub id: EntryId,

    /// The account whose balance changed.
    pub account_id: AccountId,

    /// 1-based position in the account's log.
    pub sequence: u64,

    /// What caused the change.
    pub action: LedgerAction,

    /// Credits spent (negative when credits were added).
    pub delta: i64,

    /// Balance left behind by this entry.
    pub balance_after: i64,

    /// Payment reference for purchase deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build the entry that accompanies a new revision of `record`.
    ///
    /// `record` is the account state *after* the change; the entry takes its
    /// sequence from the record revision.
    #[must_use]
    pub fn for_record(
        record: &AccountCredits,
        action: LedgerAction,
        delta: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            account_id: record.account_id.clone(),
            sequence: record.revision,
            action,
            delta,
            balance_after: record.balance,
            reference: None,
            created_at,
        }
    }

    /// Attach a payment reference.
    #[must_use]
    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    /// The signed change this entry applied to the balance.
    #[must_use]
    pub const fn balance_change(&self) -> i64 {
        -self.delta
    }
}

/// Replay entries from zero and return the resulting balance.
#[must_use]
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries.into_iter().map(LedgerEntry::balance_change).sum()
}

/// Result of comparing an account's balance to its replayed log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// The account checked.
    pub account_id: AccountId,
    /// Balance stored on the record.
    pub recorded_balance: i64,
    /// Balance obtained by replaying the log from zero.
    pub replayed_balance: i64,
    /// Number of entries replayed.
    pub entry_count: usize,
    /// Whether the entry sequences are gapless and match the record revision.
    pub sequence_intact: bool,
}

impl Reconciliation {
    /// Reconcile a record against its chronologically ordered entries.
    #[must_use]
    pub fn check(record: &AccountCredits, entries: &[LedgerEntry]) -> Self {
        let sequence_intact = entries
            .iter()
            .zip(1u64..)
            .all(|(entry, expected)| entry.sequence == expected)
            && entries.len() as u64 == record.revision;

        Self {
            account_id: record.account_id.clone(),
            recorded_balance: record.balance,
            replayed_balance: replay(entries),
            entry_count: entries.len(),
            sequence_intact,
        }
    }

    /// Whether the log fully explains the balance.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.sequence_intact && self.recorded_balance == self.replayed_balance
    }
}
