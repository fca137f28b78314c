//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait
//! on top of an optimistic transaction database. A commit reads the account
//! key with `get_for_update`, so two commits racing on the same account cannot
//! both succeed even before the revision check runs.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options,
};

use credit_ledger_core::{AccountCredits, AccountId, LedgerEntry};

use crate::error::{Result, StoreError};
use crate::hub::{BalanceHub, BalanceSubscription, BalanceUpdate};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{AccountSnapshot, LedgerWrite, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<OptimisticTransactionDB<MultiThreaded>>,
    hub: BalanceHub,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn commit_err(e: rocksdb::Error, account_id: &AccountId) -> StoreError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict {
            account_id: account_id.clone(),
        },
        _ => db_err(e),
    }
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = OptimisticTransactionDB::<MultiThreaded>::open_cf_descriptors(
            &opts,
            path,
            cf_descriptors,
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            hub: BalanceHub::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode_sequence(data: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| StoreError::Serialization("reference value is not a u64".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn get_entry(&self, account_id: &AccountId, sequence: u64) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::LEDGER_ENTRIES)?;
        self.db
            .get_cf(&cf, keys::entry_key(account_id, sequence))
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect every key in a column family that starts with `prefix`.
    fn prefixed_keys(&self, name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(name)?;
        let mut found = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key);
        }
        Ok(found)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Balance Store
    // =========================================================================

    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountCredits>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(account_id);

        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot> {
        let record = self.get_account(account_id)?;
        // The newest entry always carries the record's revision as sequence.
        let latest_entry = match &record {
            Some(record) if record.revision > 0 => self.get_entry(account_id, record.revision)?,
            _ => None,
        };

        Ok(AccountSnapshot {
            account_id: account_id.clone(),
            record,
            latest_entry,
        })
    }

    fn subscribe(&self, account_id: &AccountId) -> Result<BalanceSubscription> {
        let subscription = self.hub.watch(account_id);
        let update = self
            .get_account(account_id)?
            .map_or(BalanceUpdate::MISSING, |record| BalanceUpdate {
                balance: Some(record.balance),
                revision: record.revision,
            });
        self.hub.publish(account_id, update);
        Ok(subscription)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    fn commit(&self, write: &LedgerWrite) -> Result<()> {
        write.validate()?;
        let account_id = &write.record.account_id;

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_entries = self.cf(cf::LEDGER_ENTRIES)?;
        let cf_refs = self.cf(cf::PAYMENT_REFERENCES)?;

        let account_key = keys::account_key(account_id);
        let txn = self.db.transaction();

        let current: Option<AccountCredits> = txn
            .get_for_update_cf(&cf_accounts, &account_key, true)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()?;

        if current.as_ref().map_or(0, |r| r.revision) != write.expected_revision {
            return Err(StoreError::Conflict {
                account_id: account_id.clone(),
            });
        }

        if let Some(reference) = &write.entry.reference {
            let ref_key = keys::reference_key(account_id, reference);
            if let Some(data) = txn
                .get_for_update_cf(&cf_refs, &ref_key, true)
                .map_err(db_err)?
            {
                let sequence = Self::decode_sequence(&data)?;
                let entry: LedgerEntry = txn
                    .get_cf(&cf_entries, keys::entry_key(account_id, sequence))
                    .map_err(db_err)?
                    .map(|data| Self::deserialize(&data))
                    .transpose()?
                    .ok_or_else(|| {
                        StoreError::Database(format!(
                            "payment reference {reference} points at missing entry {sequence}"
                        ))
                    })?;
                return Err(StoreError::DuplicateReference {
                    reference: reference.clone(),
                    entry: Box::new(entry),
                });
            }
            txn.put_cf(&cf_refs, &ref_key, write.entry.sequence.to_be_bytes())
                .map_err(db_err)?;
        }

        let entry_key = keys::entry_key(account_id, write.entry.sequence);
        txn.put_cf(&cf_accounts, &account_key, Self::serialize(&write.record)?)
            .map_err(db_err)?;
        txn.put_cf(&cf_entries, &entry_key, Self::serialize(&write.entry)?)
            .map_err(db_err)?;

        txn.commit().map_err(|e| commit_err(e, account_id))?;

        self.hub.publish(account_id, write.balance_update());
        Ok(())
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_entries = self.cf(cf::LEDGER_ENTRIES)?;
        let cf_refs = self.cf(cf::PAYMENT_REFERENCES)?;

        let account_key = keys::account_key(account_id);
        let prefix = keys::account_prefix(account_id);
        let txn = self.db.transaction();

        // Locks the record: a commit racing with the erasure makes one of
        // the two transactions fail at commit time.
        if txn
            .get_for_update_cf(&cf_accounts, &account_key, true)
            .map_err(db_err)?
            .is_none()
        {
            return Err(StoreError::NotFound(account_id.clone()));
        }

        txn.delete_cf(&cf_accounts, &account_key).map_err(db_err)?;
        for key in self.prefixed_keys(cf::LEDGER_ENTRIES, &prefix)? {
            txn.delete_cf(&cf_entries, &key).map_err(db_err)?;
        }
        for key in self.prefixed_keys(cf::PAYMENT_REFERENCES, &prefix)? {
            txn.delete_cf(&cf_refs, &key).map_err(db_err)?;
        }

        txn.commit().map_err(|e| commit_err(e, account_id))?;

        self.hub.close(account_id);
        Ok(())
    }

    // =========================================================================
    // Ledger Entry Log
    // =========================================================================

    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let cf = self.cf(cf::LEDGER_ENTRIES)?;
        let prefix = keys::account_prefix(account_id);
        let upper = keys::entry_key(account_id, u64::MAX);

        let mut entries = Vec::new();
        let mut skipped = 0;

        // Reverse scan from the highest possible sequence: newest first.
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, Direction::Reverse))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entries.push(Self::deserialize(&value)?);
            if entries.len() >= limit {
                break;
            }
        }

        Ok(entries)
    }

    fn entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(cf::LEDGER_ENTRIES)?;
        let prefix = keys::account_prefix(account_id);

        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(Self::deserialize(&value)?);
        }

        Ok(entries)
    }

    fn find_reference(
        &self,
        account_id: &AccountId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::PAYMENT_REFERENCES)?;
        let Some(data) = self
            .db
            .get_cf(&cf, keys::reference_key(account_id, reference))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get_entry(account_id, Self::decode_sequence(&data)?)
    }
}
