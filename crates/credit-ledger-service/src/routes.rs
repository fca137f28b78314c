//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, credits, health, live, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for operator endpoints.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credits (ID token auth)
/// - `GET /v1/credits/balance` - Observe balance (may apply the monthly grant)
/// - `GET /v1/credits/balance/live` - WebSocket balance push
/// - `POST /v1/credits/spend` - Spend one action's cost
/// - `GET /v1/credits/entries` - Newest-first history
/// - `DELETE /v1/accounts/me` - Erase the account
///
/// ## Admin (`X-Admin-Key`)
/// - `POST /v1/admin/credits/grant` - Grant credits
/// - `GET /v1/admin/accounts/:account_id/reconcile` - Replay check
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments` - Settled payments
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let admin_routes = Router::new()
        .route("/credits/grant", post(admin::grant_credits))
        .route("/accounts/:account_id/reconcile", get(admin::reconcile))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/spend", post(credits::spend))
        .route("/credits/entries", get(credits::list_entries))
        // Accounts
        .route("/accounts/me", delete(accounts::delete_account))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // Long-lived sockets stay outside the timeout and concurrency limits
        .route("/v1/credits/balance/live", get(live::live_balance))
        .nest(
            "/v1",
            api_routes.layer(TimeoutLayer::new(Duration::from_secs(
                request_timeout_seconds,
            ))),
        )
        // Webhooks (no rate limit - controlled by the payment provider)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
