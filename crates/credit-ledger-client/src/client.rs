//! Ledger HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, CreditResponse, EntriesPage, GrantCreditsRequest,
    Reconciliation, SpendResponse,
};

/// Credit ledger API client.
///
/// User calls take the caller's ID token; operator calls take the admin key.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    admin_id: String,
}

impl LedgerClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the ledger service (e.g., `"http://credit-ledger:8080"`)
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the base URL is empty or the HTTP client
    /// cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base_url is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            admin_id: options.admin_id,
        })
    }

    /// Read the caller's balance. Applies the monthly grant when due.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self, id_token: &str) -> Result<BalanceResponse, ClientError> {
        let url = format!("{}/v1/credits/balance", self.base_url);
        let request = self.client.get(&url).bearer_auth(id_token);
        self.send(request).await
    }

    /// Spend one action's worth of credits.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCredits` when the balance is too low, or another
    /// error if the request fails.
    pub async fn spend(&self, id_token: &str) -> Result<SpendResponse, ClientError> {
        let url = format!("{}/v1/credits/spend", self.base_url);
        let request = self.client.post(&url).bearer_auth(id_token);
        self.send(request).await
    }

    /// List the caller's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_entries(
        &self,
        id_token: &str,
        limit: usize,
        offset: usize,
    ) -> Result<EntriesPage, ClientError> {
        let url = format!("{}/v1/credits/entries", self.base_url);
        let request = self
            .client
            .get(&url)
            .bearer_auth(id_token)
            .query(&[("limit", limit), ("offset", offset)]);
        self.send(request).await
    }

    /// Grant credits to an existing account.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if the account was never materialized, or
    /// another error if the request fails.
    pub async fn grant_credits(
        &self,
        admin_key: &str,
        account_id: impl Into<String>,
        amount: i64,
    ) -> Result<CreditResponse, ClientError> {
        let url = format!("{}/v1/admin/credits/grant", self.base_url);
        let body = GrantCreditsRequest {
            account_id: account_id.into(),
            amount,
            reason: None,
        };

        tracing::debug!(account_id = %body.account_id, amount, "Granting credits");

        let request = self.admin(self.client.post(&url), admin_key).json(&body);
        self.send(request).await
    }

    /// Replay an account's log against its stored balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn reconcile(
        &self,
        admin_key: &str,
        account_id: &str,
    ) -> Result<Reconciliation, ClientError> {
        let url = format!(
            "{}/v1/admin/accounts/{account_id}/reconcile",
            self.base_url
        );
        let request = self.admin(self.client.get(&url), admin_key);
        self.send(request).await
    }

    fn admin(&self, request: RequestBuilder, admin_key: &str) -> RequestBuilder {
        request
            .header("x-admin-key", admin_key)
            .header("x-admin-id", &self.admin_id)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        handle_response(response).await
    }
}

/// Decode a success body or map the error envelope to a typed error.
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();

    if status.is_success() {
        let bytes = response.bytes().await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
        return Err(ClientError::Api {
            code: "unknown".to_string(),
            message: format!("HTTP {status}"),
            status: status.as_u16(),
        });
    };

    let error = api_error.error;
    let detail = |key: &str| {
        error
            .details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    };

    match error.code.as_str() {
        "insufficient_credits" => Err(ClientError::InsufficientCredits {
            balance: detail("balance"),
            required: detail("required"),
        }),
        "unauthenticated" => Err(ClientError::Unauthenticated(error.message)),
        "account_not_found" => Err(ClientError::AccountNotFound(error.message)),
        "ledger_unavailable" => Err(ClientError::LedgerUnavailable(error.message)),
        code => Err(ClientError::Api {
            code: code.to_string(),
            message: error.message,
            status: status.as_u16(),
        }),
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Operator identity sent with admin calls for the audit log.
    pub admin_id: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            admin_id: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with an operator identity.
    #[must_use]
    pub fn with_admin_id(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
            ..Self::default()
        }
    }
}
