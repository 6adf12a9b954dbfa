//! Custody accounting
//!
//! Tracks how much of each token the ledger currently holds on behalf of
//! live jobs. Changes are computed first and applied only after the matching
//! bank transfer has succeeded, so a failed transfer never skews the totals.

use crate::{error::EscrowError, models::Token, EscrowResult};
use std::collections::BTreeMap;

/// Pending change to one token's custody total
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct CustodyUpdate {
    token: Token,
    total: u128,
}

/// Per-token custody totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Custody {
    totals: BTreeMap<Token, u128>,
}

impl Custody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount of `token` currently held
    pub fn total(&self, token: &Token) -> u128 {
        self.totals.get(token).copied().unwrap_or(0)
    }

    /// Compute the totals after taking `amount` into custody
    pub fn after_lock(&self, token: &Token, amount: u128) -> EscrowResult<CustodyUpdate> {
        let total = self.total(token).checked_add(amount).ok_or_else(|| {
            EscrowError::internal(format!("custody total for {} would overflow", token))
        })?;
        Ok(CustodyUpdate {
            token: token.clone(),
            total,
        })
    }

    /// Compute the totals after paying `amount` out of custody
    pub fn after_unlock(&self, token: &Token, amount: u128) -> EscrowResult<CustodyUpdate> {
        let total = self.total(token).checked_sub(amount).ok_or_else(|| {
            EscrowError::internal(format!(
                "custody for {} holds {}, cannot pay out {}",
                token,
                self.total(token),
                amount
            ))
        })?;
        Ok(CustodyUpdate {
            token: token.clone(),
            total,
        })
    }

    pub fn apply(&mut self, update: CustodyUpdate) {
        if update.total == 0 {
            self.totals.remove(&update.token);
        } else {
            self.totals.insert(update.token, update.total);
        }
    }

    /// All non-zero totals
    pub fn snapshot(&self) -> BTreeMap<Token, u128> {
        self.totals.clone()
    }
}
