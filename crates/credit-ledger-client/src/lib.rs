//! Credit Ledger Client SDK.
//!
//! Typed HTTP client for the credit ledger service, used by the UI layer and
//! operator tooling.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger_client::{ClientError, LedgerClient};
//!
//! # async fn example(id_token: &str) -> Result<(), ClientError> {
//! let client = LedgerClient::new("http://credit-ledger:8080")?;
//!
//! match client.spend(id_token).await {
//!     Ok(receipt) => println!("{} credits left", receipt.balance),
//!     Err(ClientError::InsufficientCredits { balance, .. }) => {
//!         println!("out of credits ({balance})");
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, LedgerClient};
pub use error::ClientError;
pub use types::*;
