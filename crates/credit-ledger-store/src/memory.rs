//! In-memory storage implementation.
//!
//! Each account lives in its own slot behind its own mutex, so commits to
//! different accounts never contend. The outer map lock is held only long
//! enough to find or insert a slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use credit_ledger_core::{AccountCredits, AccountId, LedgerEntry};

use crate::error::{Result, StoreError};
use crate::hub::{BalanceHub, BalanceSubscription, BalanceUpdate};
use crate::{AccountSnapshot, LedgerWrite, Store};

#[derive(Debug, Default)]
struct AccountSlot {
    record: Option<AccountCredits>,
    entries: Vec<LedgerEntry>,
    references: HashMap<String, usize>,
    erased: bool,
}

impl AccountSlot {
    fn revision(&self) -> u64 {
        self.record.as_ref().map_or(0, |record| record.revision)
    }
}

/// Process-local store, used in tests and for single-node development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<AccountSlot>>>>,
    hub: BalanceHub,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Database("store lock poisoned".into())
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account_id: &AccountId) -> Result<Option<Arc<Mutex<AccountSlot>>>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(account_id).cloned())
    }

    fn slot_or_insert(&self, account_id: &AccountId) -> Result<Arc<Mutex<AccountSlot>>> {
        if let Some(slot) = self.slot(account_id)? {
            return Ok(slot);
        }
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        Ok(accounts.entry(account_id.clone()).or_default().clone())
    }

    fn with_slot<T>(
        &self,
        account_id: &AccountId,
        read: impl FnOnce(Option<&AccountSlot>) -> T,
    ) -> Result<T> {
        match self.slot(account_id)? {
            Some(slot) => {
                let guard: MutexGuard<'_, AccountSlot> = slot.lock().map_err(poisoned)?;
                Ok(read(Some(&*guard)))
            }
            None => Ok(read(None)),
        }
    }
}

impl Store for MemoryStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountCredits>> {
        self.with_slot(account_id, |slot| slot.and_then(|s| s.record.clone()))
    }

    fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot> {
        self.with_slot(account_id, |slot| AccountSnapshot {
            account_id: account_id.clone(),
            record: slot.and_then(|s| s.record.clone()),
            latest_entry: slot.and_then(|s| s.entries.last().cloned()),
        })
    }

    fn subscribe(&self, account_id: &AccountId) -> Result<BalanceSubscription> {
        let subscription = self.hub.watch(account_id);
        let update = self.with_slot(account_id, |slot| {
            slot.and_then(|s| s.record.as_ref())
                .map_or(BalanceUpdate::MISSING, |record| BalanceUpdate {
                    balance: Some(record.balance),
                    revision: record.revision,
                })
        })?;
        self.hub.publish(account_id, update);
        Ok(subscription)
    }

    fn commit(&self, write: &LedgerWrite) -> Result<()> {
        write.validate()?;
        let account_id = &write.record.account_id;
        let slot = self.slot_or_insert(account_id)?;

        {
            let mut guard = slot.lock().map_err(poisoned)?;

            // An erased slot may still be referenced by a writer that looked
            // it up before the erasure.
            if guard.erased || guard.revision() != write.expected_revision {
                return Err(StoreError::Conflict {
                    account_id: account_id.clone(),
                });
            }

            if let Some(reference) = &write.entry.reference {
                if let Some(&index) = guard.references.get(reference) {
                    return Err(StoreError::DuplicateReference {
                        reference: reference.clone(),
                        entry: Box::new(guard.entries[index].clone()),
                    });
                }
                let index = guard.entries.len();
                guard.references.insert(reference.clone(), index);
            }

            guard.record = Some(write.record.clone());
            guard.entries.push(write.entry.clone());
        }

        self.hub.publish(account_id, write.balance_update());
        Ok(())
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        {
            let mut accounts = self.accounts.write().map_err(poisoned)?;
            let Some(slot) = accounts.get(account_id).cloned() else {
                return Err(StoreError::NotFound(account_id.clone()));
            };
            let mut guard = slot.lock().map_err(poisoned)?;
            if guard.record.is_none() {
                return Err(StoreError::NotFound(account_id.clone()));
            }
            *guard = AccountSlot {
                erased: true,
                ..AccountSlot::default()
            };
            drop(guard);
            accounts.remove(account_id);
        }

        self.hub.close(account_id);
        Ok(())
    }

    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.with_slot(account_id, |slot| {
            slot.map(|s| {
                s.entries
                    .iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
        })
    }

    fn entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.with_slot(account_id, |slot| {
            slot.map(|s| s.entries.clone()).unwrap_or_default()
        })
    }

    fn find_reference(
        &self,
        account_id: &AccountId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>> {
        self.with_slot(account_id, |slot| {
            slot.and_then(|s| {
                s.references
                    .get(reference)
                    .and_then(|&index| s.entries.get(index).cloned())
            })
        })
    }
}
