//! The credit ledger engine.
//!
//! `CreditLedger` runs every balance mutation as an optimistic transaction
//! against the injected [`Store`]: spends, operator and purchase credits, and
//! the free monthly grant that fires when a caller observes a zero balance.
//! It holds no locks of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;

use credit_ledger_core::{
    AccountCredits, AccountId, CreditKind, LedgerAction, LedgerConfig, LedgerEntry, LedgerError,
    Principal, Reconciliation, Result,
};
use credit_ledger_store::{
    transact, AccountSnapshot, BalanceUpdate, Decision, LedgerWrite, RetryPolicy, Store,
    StoreError, TxnError,
};

/// Largest history page served at once.
pub const MAX_PAGE_SIZE: usize = 100;

/// A balance as observed by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    /// Effective balance.
    pub balance: i64,
    /// Record revision the balance was read at (0 before the first write).
    pub revision: u64,
    /// Whether this observation committed a monthly grant.
    pub granted: bool,
}

/// Outcome of a successful spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendReceipt {
    /// Balance after the spend.
    pub balance: i64,
    /// The entry recording it.
    pub entry: LedgerEntry,
}

/// Outcome of a credit operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditReceipt {
    /// Current balance of the account.
    pub balance: i64,
    /// The applied entry, or the original one for a replayed reference.
    pub entry: LedgerEntry,
    /// `true` if the payment reference had already been applied.
    pub duplicate: bool,
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntriesPage {
    /// The entries on this page.
    pub entries: Vec<LedgerEntry>,
    /// Whether older entries follow.
    pub has_more: bool,
}

/// The ledger engine shared by all request handlers.
pub struct CreditLedger {
    store: Arc<dyn Store>,
    config: LedgerConfig,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn store_unavailable(err: &StoreError) -> LedgerError {
    LedgerError::LedgerUnavailable {
        attempts: 1,
        reason: err.to_string(),
    }
}

fn from_txn(err: TxnError<LedgerError>) -> LedgerError {
    match err {
        TxnError::Aborted(err) => err,
        TxnError::Unavailable { attempts, last } => LedgerError::LedgerUnavailable {
            attempts,
            reason: last.to_string(),
        },
        TxnError::Duplicate(entry) => LedgerError::LedgerUnavailable {
            attempts: 1,
            reason: format!("unexpected payment reference replay of entry {}", entry.id),
        },
    }
}

/// Entry timestamps never go backwards within an account.
fn entry_timestamp(snapshot: &AccountSnapshot, now: DateTime<Utc>) -> DateTime<Utc> {
    snapshot
        .latest_entry
        .as_ref()
        .map_or(now, |latest| latest.created_at.max(now))
}

fn commit<T>(
    snapshot: &AccountSnapshot,
    record: AccountCredits,
    entry: LedgerEntry,
    value: T,
) -> Decision<T> {
    Decision::Commit {
        write: LedgerWrite {
            expected_revision: snapshot.revision(),
            record,
            entry,
        },
        value,
    }
}

impl CreditLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig, retry: RetryPolicy) -> Self {
        Self {
            store,
            config,
            retry,
        }
    }

    /// The ledger parameters.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn unseen_view(&self) -> BalanceView {
        BalanceView {
            balance: self.config.free_credits,
            revision: 0,
            granted: false,
        }
    }

    // =========================================================================
    // Spend
    // =========================================================================

    /// Consume `cost` credits from the principal's account.
    ///
    /// An account without a record is materialized with the configured free
    /// credits in the same transaction.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous principals.
    /// - `InvalidAmount` if `cost` is not positive.
    /// - `InsufficientCredits` if the balance does not cover `cost`; nothing
    ///   is written.
    /// - `LedgerUnavailable` once retries are exhausted.
    pub async fn spend(&self, principal: &Principal, cost: i64) -> Result<SpendReceipt> {
        let account_id = principal.require_authenticated()?;
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "spend cost must be positive, got {cost}"
            )));
        }
        let free_credits = self.config.free_credits;

        let receipt = transact(&*self.store, account_id, &self.retry, |snapshot| {
            let now = Utc::now();
            let (current, action, delta) = match &snapshot.record {
                Some(record) => (record.clone(), LedgerAction::Spend, cost),
                None => (
                    AccountCredits::seeded(account_id.clone(), free_credits, now),
                    LedgerAction::InitialGrant,
                    cost - free_credits,
                ),
            };

            if !current.has_sufficient_credits(cost) {
                return Err(LedgerError::InsufficientCredits {
                    balance: current.balance,
                    required: cost,
                });
            }

            let record = current.next(current.balance - cost, now);
            let entry =
                LedgerEntry::for_record(&record, action, delta, entry_timestamp(snapshot, now));
            let receipt = SpendReceipt {
                balance: record.balance,
                entry: entry.clone(),
            };
            Ok(commit(snapshot, record, entry, receipt))
        })
        .await
        .map_err(from_txn)?;

        tracing::info!(
            account_id = %account_id,
            action = receipt.entry.action.as_str(),
            cost,
            balance = receipt.balance,
            "Credits spent"
        );

        Ok(receipt)
    }

    // =========================================================================
    // Credit (purchase / operator grant)
    // =========================================================================

    /// Add `amount` credits to an existing account.
    ///
    /// When `reference` is set, it is recorded with the entry and a second
    /// call with the same reference returns the original entry with
    /// `duplicate = true` instead of crediting again.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous targets.
    /// - `InvalidAmount` if `amount` is not positive or the balance would
    ///   overflow.
    /// - `AccountNotFound` if the account has no record; nothing is created.
    /// - `LedgerUnavailable` once retries are exhausted.
    pub async fn credit(
        &self,
        target: &Principal,
        amount: i64,
        kind: CreditKind,
        reference: Option<String>,
    ) -> Result<CreditReceipt> {
        let account_id = target.require_authenticated()?;
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "credit amount must be positive, got {amount}"
            )));
        }
        let action = LedgerAction::from(kind);
        let reference = reference.filter(|r| !r.trim().is_empty());

        if let Some(reference) = &reference {
            if let Some(entry) = self
                .store
                .find_reference(account_id, reference)
                .map_err(|e| store_unavailable(&e))?
            {
                return self.replayed(account_id, entry);
            }
        }

        let result = transact(&*self.store, account_id, &self.retry, |snapshot| {
            let record = snapshot
                .record
                .as_ref()
                .ok_or_else(|| LedgerError::AccountNotFound {
                    account_id: account_id.to_string(),
                })?;
            let balance = record.balance.checked_add(amount).ok_or_else(|| {
                LedgerError::InvalidAmount(format!("crediting {amount} overflows the balance"))
            })?;

            let now = Utc::now();
            let next = record.next(balance, now);
            let entry =
                LedgerEntry::for_record(&next, action, -amount, entry_timestamp(snapshot, now))
                    .with_reference(reference.clone());
            let receipt = CreditReceipt {
                balance,
                entry: entry.clone(),
                duplicate: false,
            };
            Ok(commit(snapshot, next, entry, receipt))
        })
        .await;

        match result {
            Ok(receipt) => {
                tracing::info!(
                    account_id = %account_id,
                    action = action.as_str(),
                    amount,
                    balance = receipt.balance,
                    reference = ?receipt.entry.reference,
                    "Credits added"
                );
                Ok(receipt)
            }
            // A concurrent call with the same reference won the race.
            Err(TxnError::Duplicate(entry)) => self.replayed(account_id, *entry),
            Err(err) => Err(from_txn(err)),
        }
    }

    /// Receipt for a reference that was already applied.
    fn replayed(&self, account_id: &AccountId, entry: LedgerEntry) -> Result<CreditReceipt> {
        tracing::info!(
            account_id = %account_id,
            entry_id = %entry.id,
            reference = ?entry.reference,
            "Payment reference already applied"
        );
        let balance = self
            .store
            .get_account(account_id)
            .map_err(|e| store_unavailable(&e))?
            .map_or(entry.balance_after, |record| record.balance);
        Ok(CreditReceipt {
            balance,
            entry,
            duplicate: true,
        })
    }

    // =========================================================================
    // Observation and the monthly grant
    // =========================================================================

    /// Read the principal's balance, applying the monthly grant if the
    /// balance is zero and the cooldown has passed.
    ///
    /// An account without a record reads as the free credit allowance and
    /// is not written.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous principals.
    /// - `LedgerUnavailable` if the store fails.
    pub async fn balance(&self, principal: &Principal) -> Result<BalanceView> {
        let account_id = principal.require_authenticated()?;
        let record = self
            .store
            .get_account(account_id)
            .map_err(|e| store_unavailable(&e))?;

        match record {
            None => Ok(self.unseen_view()),
            Some(record) if record.balance == 0 => self.grant_if_due(account_id).await,
            Some(record) => Ok(BalanceView {
                balance: record.balance,
                revision: record.revision,
                granted: false,
            }),
        }
    }

    async fn grant_if_due(&self, account_id: &AccountId) -> Result<BalanceView> {
        let policy = &self.config.grant;
        let unseen = self.unseen_view();

        let view = transact(&*self.store, account_id, &self.retry, |snapshot| {
            let Some(record) = &snapshot.record else {
                return Ok(Decision::Skip(unseen.clone()));
            };

            let now = Utc::now();
            if !policy.is_due(record.balance, snapshot.latest_entry.as_ref(), now) {
                return Ok(Decision::Skip(BalanceView {
                    balance: record.balance,
                    revision: record.revision,
                    granted: false,
                }));
            }

            let next = record.next(policy.amount, now);
            let entry = LedgerEntry::for_record(
                &next,
                LedgerAction::MonthlyGrant,
                -policy.amount,
                entry_timestamp(snapshot, now),
            );
            let view = BalanceView {
                balance: next.balance,
                revision: next.revision,
                granted: true,
            };
            Ok(commit(snapshot, next, entry, view))
        })
        .await
        .map_err(from_txn)?;

        if view.granted {
            tracing::info!(
                account_id = %account_id,
                amount = policy.amount,
                "Monthly grant applied"
            );
        }

        Ok(view)
    }

    async fn observe(&self, account_id: &AccountId, update: BalanceUpdate) -> Result<BalanceView> {
        match update.balance {
            None => Ok(self.unseen_view()),
            Some(0) => self.grant_if_due(account_id).await,
            Some(balance) => Ok(BalanceView {
                balance,
                revision: update.revision,
                granted: false,
            }),
        }
    }

    /// Subscribe to the principal's balance.
    ///
    /// The stream yields the current balance first, then one item per
    /// observed change, and ends when the account is erased. Every zero
    /// observation runs the monthly grant check. Dropping the stream
    /// cancels the subscription.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous principals.
    /// - `LedgerUnavailable` if the current balance cannot be read.
    pub fn subscribe(
        self: &Arc<Self>,
        principal: &Principal,
    ) -> Result<BoxStream<'static, Result<BalanceView>>> {
        let account_id = principal.require_authenticated()?.clone();
        let subscription = self
            .store
            .subscribe(&account_id)
            .map_err(|e| store_unavailable(&e))?;

        let ledger = Arc::clone(self);
        Ok(subscription
            .into_stream()
            .then(move |update| {
                let ledger = Arc::clone(&ledger);
                let account_id = account_id.clone();
                async move { ledger.observe(&account_id, update).await }
            })
            .boxed())
    }

    // =========================================================================
    // History, erasure, reconciliation
    // =========================================================================

    /// List the principal's entries newest first.
    ///
    /// `limit` is capped at [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous principals.
    /// - `LedgerUnavailable` if the store fails.
    pub fn entries(
        &self,
        principal: &Principal,
        limit: usize,
        offset: usize,
    ) -> Result<EntriesPage> {
        let account_id = principal.require_authenticated()?;
        let limit = limit.min(MAX_PAGE_SIZE);

        // Fetch one more than requested to determine has_more
        let mut entries = self
            .store
            .list_entries(account_id, limit + 1, offset)
            .map_err(|e| store_unavailable(&e))?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);

        Ok(EntriesPage { entries, has_more })
    }

    /// Delete the principal's record, entries and payment references.
    ///
    /// Live subscriptions to the account end.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for anonymous principals.
    /// - `AccountNotFound` if there is nothing to erase.
    /// - `LedgerUnavailable` once retries are exhausted.
    pub async fn erase(&self, principal: &Principal) -> Result<()> {
        let account_id = principal.require_authenticated()?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.store.delete_account(account_id) {
                Ok(()) => {
                    tracing::info!(account_id = %account_id, "Account erased");
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => {
                    return Err(LedgerError::AccountNotFound {
                        account_id: account_id.to_string(),
                    });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(
                        account_id = %account_id,
                        attempt,
                        error = %err,
                        "Retrying erasure"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(err) => {
                    tracing::warn!(
                        account_id = %account_id,
                        attempts = attempt,
                        error = %err,
                        "Erasure failed"
                    );
                    return Err(LedgerError::LedgerUnavailable {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// Replay an account's log and compare it with the stored balance.
    ///
    /// # Errors
    ///
    /// - `AccountNotFound` if the account has no record.
    /// - `LedgerUnavailable` if the store fails or keeps changing underneath
    ///   the check.
    pub fn reconcile(&self, account_id: &AccountId) -> Result<Reconciliation> {
        let max_attempts = self.retry.max_attempts.max(1);

        for _ in 0..max_attempts {
            let record = self
                .store
                .get_account(account_id)
                .map_err(|e| store_unavailable(&e))?
                .ok_or_else(|| LedgerError::AccountNotFound {
                    account_id: account_id.to_string(),
                })?;
            let entries = self
                .store
                .entries(account_id)
                .map_err(|e| store_unavailable(&e))?;

            // A commit between the two reads shows up as a longer log.
            if entries.last().map_or(0, |e| e.sequence) == record.revision {
                let report = Reconciliation::check(&record, &entries);
                if !report.is_consistent() {
                    tracing::error!(
                        account_id = %account_id,
                        recorded = report.recorded_balance,
                        replayed = report.replayed_balance,
                        sequence_intact = report.sequence_intact,
                        "Ledger does not reconcile"
                    );
                }
                return Ok(report);
            }
        }

        Err(LedgerError::LedgerUnavailable {
            attempts: max_attempts,
            reason: "account kept changing during reconciliation".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::{GrantPolicy, MONTHLY_GRANT_AMOUNT};
    use credit_ledger_store::{AccountSnapshot, BalanceSubscription, MemoryStore};
    use std::time::Duration;

    fn account_id() -> AccountId {
        AccountId::new("user-1").unwrap()
    }

    fn user() -> Principal {
        Principal::authenticated(account_id())
    }

    fn ledger_with(store: Arc<dyn Store>, free_credits: i64) -> Arc<CreditLedger> {
        let config = LedgerConfig {
            free_credits,
            ..LedgerConfig::default()
        };
        Arc::new(CreditLedger::new(store, config, RetryPolicy::immediate(8)))
    }

    fn ledger(free_credits: i64) -> Arc<CreditLedger> {
        ledger_with(Arc::new(MemoryStore::new()), free_credits)
    }

    /// Write a record at `balance` whose only entry is `age` old.
    fn seed(store: &MemoryStore, balance: i64, age: chrono::Duration) {
        let at = Utc::now() - age;
        let record = AccountCredits::seeded(account_id(), 0, at).next(balance, at);
        let entry = LedgerEntry::for_record(&record, LedgerAction::InitialGrant, -balance, at);
        store
            .commit(&LedgerWrite {
                expected_revision: 0,
                record,
                entry,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn first_spends_materialize_the_account() {
        let ledger = ledger(2);

        let first = ledger.spend(&user(), 1).await.unwrap();
        let second = ledger.spend(&user(), 1).await.unwrap();

        assert_eq!(first.balance, 1);
        assert_eq!(first.entry.action, LedgerAction::InitialGrant);
        assert_eq!(second.balance, 0);
        assert_eq!(second.entry.action, LedgerAction::Spend);

        let entries = ledger.store().entries(&account_id()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(ledger.reconcile(&account_id()).unwrap().is_consistent());
    }

    #[tokio::test]
    async fn spend_at_zero_is_rejected_without_writing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0, chrono::Duration::days(1));
        let ledger = ledger_with(store, 5);

        let result = ledger.spend(&user(), 1).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientCredits {
                balance: 0,
                required: 1
            })
        ));
        assert_eq!(ledger.store().entries(&account_id()).unwrap().len(), 1);
        assert_eq!(
            ledger.store().get_account(&account_id()).unwrap().unwrap().balance,
            0
        );
    }

    #[tokio::test]
    async fn expensive_first_spend_creates_nothing() {
        let ledger = ledger(2);
        let result = ledger.spend(&user(), 3).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientCredits {
                balance: 2,
                required: 3
            })
        ));
        assert!(ledger.store().get_account(&account_id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let ledger = ledger(5);
        assert!(matches!(
            ledger.spend(&user(), 0).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.credit(&user(), -3, CreditKind::AdminGrant, None).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_principals_cannot_touch_credits() {
        let ledger = ledger(5);
        let anon = Principal::anonymous(account_id());

        assert!(matches!(
            ledger.spend(&anon, 1).await,
            Err(LedgerError::Unauthenticated)
        ));
        assert!(matches!(
            ledger.balance(&anon).await,
            Err(LedgerError::Unauthenticated)
        ));
        assert!(matches!(
            ledger.entries(&anon, 10, 0),
            Err(LedgerError::Unauthenticated)
        ));
        assert!(matches!(
            ledger.credit(&anon, 5, CreditKind::Purchase, None).await,
            Err(LedgerError::Unauthenticated)
        ));
        assert!(ledger.store().get_account(&account_id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn unseen_account_reads_free_credits_without_writing() {
        let ledger = ledger(5);
        let view = ledger.balance(&user()).await.unwrap();

        assert_eq!(view.balance, 5);
        assert!(!view.granted);
        assert!(ledger.store().get_account(&account_id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn grant_applies_once_after_cooldown() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0, chrono::Duration::days(40));
        let ledger = ledger_with(store, 5);

        let first = ledger.balance(&user()).await.unwrap();
        assert!(first.granted);
        assert_eq!(first.balance, MONTHLY_GRANT_AMOUNT);

        let second = ledger.balance(&user()).await.unwrap();
        assert!(!second.granted);
        assert_eq!(second.balance, MONTHLY_GRANT_AMOUNT);

        let grants = ledger
            .store()
            .entries(&account_id())
            .unwrap()
            .into_iter()
            .filter(|e| e.action == LedgerAction::MonthlyGrant)
            .count();
        assert_eq!(grants, 1);
        assert!(ledger.reconcile(&account_id()).unwrap().is_consistent());
    }

    #[tokio::test]
    async fn no_grant_inside_cooldown() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0, chrono::Duration::days(3));
        let ledger = ledger_with(store, 5);

        let view = ledger.balance(&user()).await.unwrap();
        assert_eq!(view.balance, 0);
        assert!(!view.granted);
        assert_eq!(ledger.store().entries(&account_id()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spending_down_to_zero_does_not_grant_immediately() {
        let ledger = ledger(1);
        ledger.spend(&user(), 1).await.unwrap();

        let view = ledger.balance(&user()).await.unwrap();
        assert_eq!(view.balance, 0);
        assert!(!view.granted);
    }

    #[tokio::test]
    async fn concurrent_grant_observations_grant_once() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0, chrono::Duration::days(45));
        let ledger = ledger_with(store, 5);

        let (user_a, user_b) = (user(), user());
        let (a, b) = tokio::join!(ledger.balance(&user_a), ledger.balance(&user_b));
        assert_eq!(a.unwrap().balance, MONTHLY_GRANT_AMOUNT);
        assert_eq!(b.unwrap().balance, MONTHLY_GRANT_AMOUNT);
        assert_eq!(ledger.store().entries(&account_id()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_grant_never_fires() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = LedgerConfig {
            grant: GrantPolicy {
                amount: 0,
                cooldown_days: 30,
            },
            ..LedgerConfig::default()
        };
        let ledger = CreditLedger::new(store, config, RetryPolicy::immediate(2));
        ledger.spend(&user(), 5).await.unwrap();

        let view = ledger.balance(&user()).await.unwrap();
        assert_eq!(view.balance, 0);
        assert!(!view.granted);
    }

    #[tokio::test]
    async fn oversized_cooldown_reads_without_granting() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0, chrono::Duration::days(40));
        let config = LedgerConfig {
            grant: GrantPolicy {
                amount: 5,
                cooldown_days: i64::MAX / 1000,
            },
            ..LedgerConfig::default()
        };
        let ledger = CreditLedger::new(store, config, RetryPolicy::immediate(2));

        let view = ledger.balance(&user()).await.unwrap();
        assert_eq!(view.balance, 0);
        assert!(!view.granted);
    }

    #[tokio::test]
    async fn admin_grant_to_unknown_account_fails() {
        let ledger = ledger(5);
        let ghost = Principal::authenticated(AccountId::new("ghost").unwrap());

        let result = ledger.credit(&ghost, 10, CreditKind::AdminGrant, None).await;

        assert!(matches!(result, Err(LedgerError::AccountNotFound { .. })));
        assert!(ledger
            .store()
            .get_account(&AccountId::new("ghost").unwrap())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn purchase_adds_to_balance() {
        let ledger = ledger(5);
        ledger.spend(&user(), 2).await.unwrap();

        let receipt = ledger
            .credit(&user(), 25, CreditKind::Purchase, None)
            .await
            .unwrap();

        assert_eq!(receipt.balance, 28);
        assert_eq!(receipt.entry.action, LedgerAction::Purchase);
        assert_eq!(receipt.entry.delta, -25);
        assert!(!receipt.duplicate);
        assert_eq!(ledger.store().entries(&account_id()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replayed_payment_reference_is_applied_once() {
        let ledger = ledger(5);
        ledger.spend(&user(), 2).await.unwrap();

        let first = ledger
            .credit(&user(), 25, CreditKind::Purchase, Some("pi_123".into()))
            .await
            .unwrap();
        let replay = ledger
            .credit(&user(), 25, CreditKind::Purchase, Some("pi_123".into()))
            .await
            .unwrap();

        assert!(replay.duplicate);
        assert_eq!(replay.entry, first.entry);
        assert_eq!(replay.balance, 28);
        assert_eq!(ledger.store().entries(&account_id()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replay_is_recognized_before_overflow_check() {
        let ledger = ledger(5);
        ledger.spend(&user(), 1).await.unwrap();

        let amount = i64::MAX - 10;
        let first = ledger
            .credit(&user(), amount, CreditKind::Purchase, Some("pi_big".into()))
            .await
            .unwrap();
        let replay = ledger
            .credit(&user(), amount, CreditKind::Purchase, Some("pi_big".into()))
            .await
            .unwrap();

        assert!(replay.duplicate);
        assert_eq!(replay.entry, first.entry);
        assert_eq!(replay.balance, 4 + amount);
    }

    #[tokio::test]
    async fn credit_overflow_is_rejected() {
        let ledger = ledger(5);
        ledger.spend(&user(), 1).await.unwrap();

        let result = ledger
            .credit(&user(), i64::MAX, CreditKind::AdminGrant, None)
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn entries_page_newest_first() {
        let ledger = ledger(5);
        for _ in 0..4 {
            ledger.spend(&user(), 1).await.unwrap();
        }

        let page = ledger.entries(&user(), 3, 0).unwrap();
        assert_eq!(
            page.entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![4, 3, 2]
        );
        assert!(page.has_more);

        let rest = ledger.entries(&user(), 3, 3).unwrap();
        assert_eq!(rest.entries.len(), 1);
        assert!(!rest.has_more);
    }

    #[tokio::test]
    async fn erasure_resets_the_account() {
        let ledger = ledger(5);
        ledger.spend(&user(), 3).await.unwrap();
        ledger
            .credit(&user(), 10, CreditKind::Purchase, Some("pi_9".into()))
            .await
            .unwrap();

        ledger.erase(&user()).await.unwrap();
        assert!(ledger.store().get_account(&account_id()).unwrap().is_none());
        assert!(ledger.store().entries(&account_id()).unwrap().is_empty());
        assert!(matches!(
            ledger.erase(&user()).await,
            Err(LedgerError::AccountNotFound { .. })
        ));

        let receipt = ledger.spend(&user(), 1).await.unwrap();
        assert_eq!(receipt.balance, 4);
        assert_eq!(receipt.entry.action, LedgerAction::InitialGrant);
    }

    #[tokio::test]
    async fn subscription_pushes_balance_changes() {
        let ledger = ledger(5);
        let mut stream = ledger.subscribe(&user()).unwrap();

        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.balance, 5);
        assert_eq!(initial.revision, 0);

        ledger.spend(&user(), 1).await.unwrap();
        let after_spend = stream.next().await.unwrap().unwrap();
        assert_eq!(after_spend.balance, 4);
        assert_eq!(after_spend.revision, 1);

        ledger.erase(&user()).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn subscription_rejects_anonymous() {
        let ledger = ledger(5);
        assert!(matches!(
            ledger.subscribe(&Principal::anonymous(account_id())),
            Err(LedgerError::Unauthenticated)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spends_never_overdraw() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let retry = RetryPolicy {
            max_attempts: 500,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        };
        let ledger = Arc::new(CreditLedger::new(store, LedgerConfig::default(), retry));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.spend(&user(), 1).await })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::InsufficientCredits { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        let record = ledger.store().get_account(&account_id()).unwrap().unwrap();
        assert_eq!(successes, 5);
        assert_eq!(record.balance, 0);
        assert!(ledger.reconcile(&account_id()).unwrap().is_consistent());
    }

    /// Store whose commits always lose the race.
    struct ContendedStore(MemoryStore);

    impl Store for ContendedStore {
        fn get_account(
            &self,
            account_id: &AccountId,
        ) -> credit_ledger_store::Result<Option<AccountCredits>> {
            self.0.get_account(account_id)
        }

        fn snapshot(&self, account_id: &AccountId) -> credit_ledger_store::Result<AccountSnapshot> {
            self.0.snapshot(account_id)
        }

        fn subscribe(
            &self,
            account_id: &AccountId,
        ) -> credit_ledger_store::Result<BalanceSubscription> {
            self.0.subscribe(account_id)
        }

        fn commit(&self, write: &LedgerWrite) -> credit_ledger_store::Result<()> {
            Err(StoreError::Conflict {
                account_id: write.record.account_id.clone(),
            })
        }

        fn delete_account(&self, account_id: &AccountId) -> credit_ledger_store::Result<()> {
            self.0.delete_account(account_id)
        }

        fn list_entries(
            &self,
            account_id: &AccountId,
            limit: usize,
            offset: usize,
        ) -> credit_ledger_store::Result<Vec<LedgerEntry>> {
            self.0.list_entries(account_id, limit, offset)
        }

        fn entries(&self, account_id: &AccountId) -> credit_ledger_store::Result<Vec<LedgerEntry>> {
            self.0.entries(account_id)
        }

        fn find_reference(
            &self,
            account_id: &AccountId,
            reference: &str,
        ) -> credit_ledger_store::Result<Option<LedgerEntry>> {
            self.0.find_reference(account_id, reference)
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_unavailable() {
        let ledger = CreditLedger::new(
            Arc::new(ContendedStore(MemoryStore::new())),
            LedgerConfig::default(),
            RetryPolicy::immediate(4),
        );

        match ledger.spend(&user(), 1).await {
            Err(LedgerError::LedgerUnavailable { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected LedgerUnavailable, got {other:?}"),
        }
        assert!(ledger.store().get_account(&account_id()).unwrap().is_none());
    }
}
