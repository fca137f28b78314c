//! Common test utilities for credit-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::{TestServer, TestServerConfig};

use credit_ledger_core::LedgerConfig;
use credit_ledger_service::crypto::hmac_sha256_hex;
use credit_ledger_service::{create_router, AppState, ServiceConfig, StorageBackend};
use credit_ledger_store::{MemoryStore, RetryPolicy};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The account used by `user_auth_header`.
    pub test_account_id: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and default ledger
    /// parameters.
    pub fn new() -> Self {
        Self::with_ledger(LedgerConfig::default())
    }

    /// Create a harness with custom ledger parameters.
    pub fn with_ledger(ledger: LedgerConfig) -> Self {
        Self::with_config(ServiceConfig {
            ledger,
            ..test_config()
        })
    }

    /// Create a harness from a full service configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let server = TestServer::new(router(config)).expect("Failed to create test server");
        Self::from_server(server)
    }

    /// Create a harness served over a real socket, needed for WebSocket tests.
    pub fn with_http_transport() -> Self {
        let server_config = TestServerConfig::builder().http_transport().build();
        let server = TestServer::new_with_config(router(test_config()), server_config)
            .expect("Failed to create test server");
        Self::from_server(server)
    }

    fn from_server(server: TestServer) -> Self {
        Self {
            server,
            test_account_id: "user-1".into(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_account_id)
    }

    /// Get an anonymous sign-in's auth header.
    pub fn anonymous_auth_header(&self) -> String {
        format!("Bearer test-anon:{}", self.test_account_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        "Bearer test-token:user-2".to_string()
    }

    /// Spend once as the test user, asserting success.
    pub async fn spend(&self) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/credits/spend")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Read the test user's balance.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["balance"].as_i64().expect("balance is a number")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// The configuration every harness starts from.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        storage_backend: StorageBackend::Memory,
        admin_api_key: Some(ADMIN_KEY.into()),
        payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
        retry: RetryPolicy::immediate(16),
        ..ServiceConfig::default()
    }
}

fn router(config: ServiceConfig) -> Router {
    create_router(AppState::new(Arc::new(MemoryStore::new()), config))
}

/// Sign a webhook body the way the payment provider does.
pub fn sign(body: &str) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes()).expect("HMAC accepts any key")
}
