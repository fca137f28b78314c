//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use credit_ledger_core::{GrantPolicy, InvalidConfig, LedgerConfig};
use credit_ledger_store::RetryPolicy;

/// Which store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local, lost on restart.
    Memory,
    /// `RocksDB` under `data_dir`.
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::Rocksdb),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        if cfg!(feature = "rocksdb-backend") {
            Self::Rocksdb
        } else {
            Self::Memory
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Store backend (default: rocksdb when compiled in, memory otherwise).
    pub storage_backend: StorageBackend,

    /// Path to `RocksDB` data directory (default: "/data/credit-ledger").
    pub data_dir: String,

    /// Expected ID token issuer.
    pub auth_issuer: String,

    /// Expected ID token audience.
    pub auth_audience: String,

    /// Where the token signing keys are published.
    pub auth_jwks_url: String,

    /// Operator key for admin endpoints.
    pub admin_api_key: Option<String>,

    /// HMAC secret of the payment provider's callbacks.
    pub payment_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Ledger parameters.
    pub ledger: LedgerConfig,

    /// Transaction retry bounds.
    pub retry: RetryPolicy,
}

/// Payment secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentSecrets {
    webhook_secret: String,
}

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger parameter is out of range.
    pub fn from_env() -> Result<Self, InvalidConfig> {
        let config = Self::from_env_unchecked();
        config.validate()?;
        Ok(config)
    }

    /// Check the loaded values before the service starts.
    ///
    /// # Errors
    ///
    /// Returns the first ledger parameter that is out of range.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        self.ledger.validate()
    }

    fn from_env_unchecked() -> Self {
        let defaults = Self::default();
        let auth_issuer = std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer);
        let auth_jwks_url = std::env::var("AUTH_JWKS_URL").unwrap_or(defaults.auth_jwks_url);

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            storage_backend: env_or("STORAGE_BACKEND", defaults.storage_backend),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_issuer,
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            auth_jwks_url,
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            payment_webhook_secret: load_payment_secret(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            ledger: LedgerConfig {
                free_credits: env_or("FREE_CREDITS", defaults.ledger.free_credits),
                spend_cost: env_or("SPEND_COST", defaults.ledger.spend_cost),
                grant: GrantPolicy {
                    amount: env_or("MONTHLY_GRANT_AMOUNT", defaults.ledger.grant.amount),
                    cooldown_days: env_or(
                        "GRANT_COOLDOWN_DAYS",
                        defaults.ledger.grant.cooldown_days,
                    ),
                },
            },
            retry: RetryPolicy {
                max_attempts: env_or("TXN_MAX_ATTEMPTS", defaults.retry.max_attempts),
                base_backoff: Duration::from_millis(env_or("TXN_BASE_BACKOFF_MS", 5)),
                ..defaults.retry
            },
        }
    }
}

/// Load the payment webhook secret from file or environment.
fn load_payment_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/payments.json",
        "credit-ledger/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentSecrets>(path) {
            tracing::info!(path = %path, "Loaded payment secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Payment secrets file not found, using environment variables");
    std::env::var("PAYMENT_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            storage_backend: StorageBackend::default(),
            data_dir: "/data/credit-ledger".into(),
            auth_issuer: "https://securetoken.google.com/credit-ledger".into(),
            auth_audience: "credit-ledger".into(),
            auth_jwks_url:
                "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
                    .into(),
            admin_api_key: None,
            payment_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            ledger: LedgerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!("memory".parse(), Ok(StorageBackend::Memory));
        assert_eq!(" RocksDB ".parse(), Ok(StorageBackend::Rocksdb));
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn defaults_match_product_constants() {
        let config = ServiceConfig::default();
        assert_eq!(config.ledger.free_credits, 5);
        assert_eq!(config.ledger.grant.amount, 5);
        assert_eq!(config.ledger.grant.cooldown_days, 30);
        assert_eq!(config.ledger.spend_cost, 1);
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_ledger_parameters_fail_validation() {
        let mut config = ServiceConfig::default();
        config.ledger.grant.cooldown_days = i64::MAX / 1000;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "grant_cooldown_days");

        let mut config = ServiceConfig::default();
        config.ledger.spend_cost = 0;
        assert_eq!(config.validate().unwrap_err().field, "spend_cost");
    }
}
