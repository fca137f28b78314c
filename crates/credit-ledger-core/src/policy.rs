//! Ledger configuration and the free-grant decision.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{FREE_CREDITS, GRANT_COOLDOWN_DAYS, MONTHLY_GRANT_AMOUNT, SPEND_COST};
use crate::LedgerEntry;

/// Process-wide ledger parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Balance a never-seen account is materialized with.
    pub free_credits: i64,

    /// Credits consumed by one paid action.
    pub spend_cost: i64,

    /// Free grant rules.
    pub grant: GrantPolicy,
}

/// A ledger parameter outside its accepted range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ledger config: {field} = {value}, expected {expected}")]
pub struct InvalidConfig {
    /// Offending parameter.
    pub field: &'static str,
    /// Value it was given.
    pub value: i64,
    /// Accepted range.
    pub expected: &'static str,
}

impl LedgerConfig {
    /// Check every parameter is in range.
    ///
    /// # Errors
    ///
    /// Returns the first parameter that is out of range.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.free_credits < 0 {
            return Err(InvalidConfig {
                field: "free_credits",
                value: self.free_credits,
                expected: ">= 0",
            });
        }
        if self.spend_cost <= 0 {
            return Err(InvalidConfig {
                field: "spend_cost",
                value: self.spend_cost,
                expected: "> 0",
            });
        }
        self.grant.validate()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            free_credits: FREE_CREDITS,
            spend_cost: SPEND_COST,
            grant: GrantPolicy::default(),
        }
    }
}

/// Decides when an empty account gets its free replenishment.
///
/// The policy is stateless: the cooldown is measured from the newest ledger
/// entry, whatever its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantPolicy {
    /// Balance restored by a grant.
    pub amount: i64,

    /// Days since the newest entry before a grant is due.
    pub cooldown_days: i64,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            amount: MONTHLY_GRANT_AMOUNT,
            cooldown_days: GRANT_COOLDOWN_DAYS,
        }
    }
}

impl GrantPolicy {
    /// Longest cooldown accepted, about a thousand years.
    pub const MAX_COOLDOWN_DAYS: i64 = 365_000;

    /// The cooldown window, `None` when it does not fit a `Duration`.
    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        Duration::try_days(self.cooldown_days)
    }

    /// Check the grant amount and cooldown are in range. An amount of 0
    /// disables the grant.
    ///
    /// # Errors
    ///
    /// Returns the first parameter that is out of range.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.amount < 0 {
            return Err(InvalidConfig {
                field: "monthly_grant_amount",
                value: self.amount,
                expected: ">= 0",
            });
        }
        if !(0..=Self::MAX_COOLDOWN_DAYS).contains(&self.cooldown_days) {
            return Err(InvalidConfig {
                field: "grant_cooldown_days",
                value: self.cooldown_days,
                expected: "0..=365000",
            });
        }
        Ok(())
    }

    /// Whether a grant is due for an account at `balance` whose newest entry
    /// is `latest`.
    #[must_use]
    pub fn is_due(&self, balance: i64, latest: Option<&LedgerEntry>, now: DateTime<Utc>) -> bool {
        if balance != 0 || self.amount <= 0 {
            return false;
        }
        let Some(cooldown) = self.cooldown() else {
            return false;
        };
        latest.map_or(true, |entry| {
            now.signed_duration_since(entry.created_at) > cooldown
        })
    }
}
