//! Application state.

use std::sync::Arc;

use credit_ledger_store::{MemoryStore, Store, StoreError};

use crate::auth::JwksCache;
use crate::config::{ServiceConfig, StorageBackend};
use crate::ledger::CreditLedger;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger engine.
    pub ledger: Arc<CreditLedger>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Identity provider signing keys.
    pub jwks: Arc<JwksCache>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not configured - admin endpoints are disabled");
        }
        if config.payment_webhook_secret.is_none() {
            tracing::warn!("Payment webhook secret not configured - payment callbacks are disabled");
        }

        let ledger = CreditLedger::new(store, config.ledger.clone(), config.retry.clone());

        Self {
            ledger: Arc::new(ledger),
            config,
            jwks: Arc::new(JwksCache::new()),
        }
    }
}

/// Open the store backend selected in `config`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, or if `rocksdb` is
/// selected in a build without the `rocksdb-backend` feature.
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store - balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::Rocksdb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(credit_ledger_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::Rocksdb => Err(StoreError::Database(
            "built without the rocksdb-backend feature".into(),
        )),
    }
}
