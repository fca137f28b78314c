//! Optimistic transactions with bounded retry.
//!
//! A transaction is a pure decision over an [`AccountSnapshot`]. The decision
//! is re-run from a fresh snapshot whenever the commit loses a race, so its
//! logical outcome never depends on which attempt succeeded.

use std::time::Duration;

use credit_ledger_core::{AccountId, LedgerEntry};

use crate::{AccountSnapshot, LedgerWrite, Store, StoreError};

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Default delay before the first retry.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound for a single retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(200);

/// How often and how patiently a transaction is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_backoff: Duration,
    /// Cap for a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and no delay between them.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What a transaction decided to do with its snapshot.
#[derive(Debug)]
pub enum Decision<T> {
    /// Commit the write, then return `value`.
    Commit {
        /// The write to apply.
        write: LedgerWrite,
        /// Returned once the write is durable.
        value: T,
    },
    /// Nothing to write; return `value`.
    Skip(T),
}

/// Why a transaction did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TxnError<E> {
    /// The decision itself refused to proceed (e.g. insufficient credits).
    #[error("transaction aborted: {0}")]
    Aborted(E),

    /// The write carried a payment reference that was already applied.
    #[error("payment reference already applied in entry {}", .0.id)]
    Duplicate(Box<LedgerEntry>),

    /// Retries ran out or the store failed permanently.
    #[error("transaction failed after {attempts} attempt(s): {last}")]
    Unavailable {
        /// Attempts made.
        attempts: u32,
        /// The last store error.
        last: StoreError,
    },
}

/// Run `decide` against fresh snapshots until its write commits, it skips or
/// aborts, or the retry budget is exhausted.
///
/// Conflicts and database errors are retried with exponential backoff.
/// Serialization and invalid-write errors fail immediately.
///
/// # Errors
///
/// See [`TxnError`].
pub async fn transact<S, T, E, F>(
    store: &S,
    account_id: &AccountId,
    policy: &RetryPolicy,
    mut decide: F,
) -> Result<T, TxnError<E>>
where
    S: Store + ?Sized,
    F: FnMut(&AccountSnapshot) -> Result<Decision<T>, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match store.snapshot(account_id) {
            Ok(snapshot) => match decide(&snapshot).map_err(TxnError::Aborted)? {
                Decision::Skip(value) => return Ok(value),
                Decision::Commit { write, value } => store.commit(&write).map(|()| value),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(StoreError::DuplicateReference { entry, .. }) => {
                return Err(TxnError::Duplicate(entry));
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(
                    account_id = %account_id,
                    attempt,
                    error = %err,
                    "Retrying ledger transaction"
                );
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(err) => {
                tracing::warn!(
                    account_id = %account_id,
                    attempts = attempt,
                    error = %err,
                    "Ledger transaction failed"
                );
                return Err(TxnError::Unavailable {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
