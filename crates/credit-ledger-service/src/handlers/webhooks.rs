//! Payment provider callbacks.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{AccountId, CreditKind, Principal};

use crate::crypto::verify_hmac_sha256_hex;
use crate::error::ApiError;
use crate::handlers::admin::CreditResponse;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Event type of a settled payment.
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

/// Payment callback payload.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Account that paid.
    pub account_id: String,
    /// Credits bought.
    pub amount: i64,
    /// Provider payment ID, used to apply each payment once.
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// The credit applied, for `payment.succeeded` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<CreditResponse>,
}

/// Handle payment callbacks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    // Unsigned callbacks would let anyone mint credits.
    let secret = state
        .config
        .payment_webhook_secret
        .as_deref()
        .ok_or(ApiError::NotConfigured("PAYMENT_WEBHOOK_SECRET"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing payment signature".into()))?;

    if !verify_hmac_sha256_hex(secret, body.as_bytes(), signature) {
        tracing::warn!("Invalid payment webhook signature");
        return Err(ApiError::BadRequest("Invalid webhook signature".into()));
    }

    let event: PaymentEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        account_id = %event.account_id,
        payment_reference = ?event.payment_reference,
        "Received payment webhook"
    );

    if event.event_type != PAYMENT_SUCCEEDED {
        tracing::debug!(event_type = %event.event_type, "Unhandled payment event");
        return Ok(Json(WebhookResponse {
            received: true,
            credit: None,
        }));
    }

    let account_id = AccountId::new(event.account_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid account_id: {e}")))?;

    let receipt = state
        .ledger
        .credit(
            &Principal::authenticated(account_id.clone()),
            event.amount,
            CreditKind::Purchase,
            event.payment_reference,
        )
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        credit: Some(CreditResponse::new(&account_id, &receipt)),
    }))
}
