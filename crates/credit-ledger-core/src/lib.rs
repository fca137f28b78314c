//! Core types for the credit ledger.
//!
//! This crate provides the types shared by the store, the service and the client:
//!
//! - **Identifiers**: `AccountId`, `EntryId`
//! - **Accounts**: `AccountCredits`, the per-user balance record
//! - **Ledger**: `LedgerEntry`, `LedgerAction`, `CreditKind`, replay and reconciliation
//! - **Policy**: `LedgerConfig`, `GrantPolicy`
//! - **Identity**: `Principal`
//!
//! # Sign convention
//!
//! Entries store `delta` as *credits spent*: a spend of 1 is `+1`, a purchase
//! of 25 is `-25`. Replaying a log from zero is `Σ -delta` and must equal the
//! record's balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod policy;
pub mod principal;

pub use account::{
    AccountCredits, FREE_CREDITS, GRANT_COOLDOWN_DAYS, MONTHLY_GRANT_AMOUNT, SPEND_COST,
};
pub use error::{LedgerError, Result};
pub use ids::{AccountId, EntryId, IdError, MAX_ACCOUNT_ID_LEN};
pub use ledger::{replay, CreditKind, LedgerAction, LedgerEntry, Reconciliation};
pub use policy::{GrantPolicy, InvalidConfig, LedgerConfig};
pub use principal::Principal;
