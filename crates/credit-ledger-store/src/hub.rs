//! Push-based balance subscriptions.
//!
//! Each watched account owns a `tokio::sync::watch` channel. Writers publish
//! after commit and never wait on readers; readers only ever see the newest
//! revision, intermediate values may be skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use credit_ledger_core::AccountId;

/// A balance observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// Stored balance, `None` while the account has no record.
    pub balance: Option<i64>,
    /// Record revision the balance was read at (0 without a record).
    pub revision: u64,
}

impl BalanceUpdate {
    /// The observation of an account without a record.
    pub const MISSING: Self = Self {
        balance: None,
        revision: 0,
    };
}

type ChannelMap = HashMap<AccountId, watch::Sender<BalanceUpdate>>;
type Channels = Mutex<ChannelMap>;

fn lock(channels: &Channels) -> MutexGuard<'_, ChannelMap> {
    // The map holds no invariants a panicking holder could break.
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live view of one account's balance.
///
/// Dropping the subscription cancels it; the last one to go unregisters the
/// account from the hub.
#[derive(Debug)]
pub struct BalanceSubscription {
    account_id: AccountId,
    rx: watch::Receiver<BalanceUpdate>,
    channels: Weak<Channels>,
}

impl BalanceSubscription {
    /// The account being watched.
    #[must_use]
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// The newest observation, without waiting.
    #[must_use]
    pub fn current(&self) -> BalanceUpdate {
        *self.rx.borrow()
    }

    /// Wait for the next change. Returns `None` once the account is erased.
    pub async fn changed(&mut self) -> Option<BalanceUpdate> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Convert into a stream that yields the current value first and then
    /// every subsequent change.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, BalanceUpdate> {
        stream::unfold((self, true), |(mut sub, first)| async move {
            if !first {
                sub.rx.changed().await.ok()?;
            }
            let update = *sub.rx.borrow_and_update();
            Some((update, (sub, false)))
        })
        .boxed()
    }
}

impl Drop for BalanceSubscription {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = lock(&channels);
        // `self.rx` is still registered here, so the last subscriber sees a
        // count of one. The channel may also have been replaced after an
        // erase, in which case it is not ours to remove.
        let last = channels.get(&self.account_id).is_some_and(|sender| {
            sender.receiver_count() == 1 && sender.subscribe().same_channel(&self.rx)
        });
        if last {
            channels.remove(&self.account_id);
        }
    }
}

/// Fan-out point for balance changes, shared by the store backends.
#[derive(Debug, Default)]
pub struct BalanceHub {
    channels: Arc<Channels>,
}

impl BalanceHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, ChannelMap> {
        lock(&self.channels)
    }

    /// Register a subscriber, then offer `current` as its first value.
    ///
    /// Backends must call [`BalanceHub::watch`] before reading the current
    /// value and pass that value to [`BalanceHub::publish`]; a commit landing in
    /// between is then never lost.
    #[must_use]
    pub fn watch(&self, account_id: &AccountId) -> BalanceSubscription {
        let mut channels = self.channels();
        let sender = channels
            .entry(account_id.clone())
            .or_insert_with(|| watch::channel(BalanceUpdate::MISSING).0);
        BalanceSubscription {
            account_id: account_id.clone(),
            rx: sender.subscribe(),
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Publish an observation. Older revisions than the one already held are
    /// ignored.
    pub fn publish(&self, account_id: &AccountId, update: BalanceUpdate) {
        let mut channels = self.channels();
        let Some(sender) = channels.get(account_id) else {
            return;
        };
        if sender.receiver_count() == 0 {
            channels.remove(account_id);
            return;
        }
        sender.send_if_modified(|held| {
            if update.revision > held.revision {
                *held = update;
                true
            } else {
                false
            }
        });
    }

    /// End every subscription to an erased account.
    pub fn close(&self, account_id: &AccountId) {
        self.channels().remove(account_id);
    }

    #[cfg(test)]
    fn watched_accounts(&self) -> usize {
        self.channels().len()
    }
}
