//! The caller identity handed over by the authentication provider.

use serde::{Deserialize, Serialize};

use crate::{AccountId, LedgerError};

/// An identity as seen by the ledger.
///
/// Anonymous sign-ins still carry a stable account ID but may not hold or
/// move credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// The account the identity maps to.
    pub account_id: AccountId,

    /// `false` for anonymous sign-ins.
    pub is_authenticated: bool,
}

impl Principal {
    /// A signed-in, non-anonymous principal.
    #[must_use]
    pub fn authenticated(account_id: AccountId) -> Self {
        Self {
            account_id,
            is_authenticated: true,
        }
    }

    /// An anonymous principal.
    #[must_use]
    pub fn anonymous(account_id: AccountId) -> Self {
        Self {
            account_id,
            is_authenticated: false,
        }
    }

    /// Return the account ID, rejecting anonymous principals.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unauthenticated`] for anonymous principals.
    pub fn require_authenticated(&self) -> Result<&AccountId, LedgerError> {
        if self.is_authenticated {
            Ok(&self.account_id)
        } else {
            Err(LedgerError::Unauthenticated)
        }
    }
}
