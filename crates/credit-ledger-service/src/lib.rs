//! Credit Ledger HTTP API Service.
//!
//! This crate provides the ledger engine and its HTTP API:
//!
//! - Balance observation, including the monthly free grant
//! - Spending with lazy account creation
//! - Operator grants and payment callbacks
//! - Newest-first history and a live balance WebSocket
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **ID tokens** - For end-user requests; anonymous sign-ins are rejected
//!    by every credit operation
//! 2. **Admin API key** - For operator tooling

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use ledger::{BalanceView, CreditLedger, CreditReceipt, EntriesPage, SpendReceipt};
pub use routes::create_router;
pub use state::{open_store, AppState};
