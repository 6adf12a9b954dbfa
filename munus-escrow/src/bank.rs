//! Token Bank - Moves funds into and out of escrow custody
//!
//! The ledger never holds balances itself. It asks a `TokenBank` to pull a
//! job's funds from the creator into the custodian account and to push them
//! out again on release or refund. Each transfer must be all-or-nothing.

use crate::models::{Address, Token};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Why a transfer was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient {token} balance for {account}: has {available}, needs {required}")]
    InsufficientBalance {
        token: Token,
        account: Address,
        available: u128,
        required: u128,
    },

    #[error("account {0} rejected the transfer")]
    Rejected(Address),

    #[error("balance overflow for {0}")]
    Overflow(Address),
}

/// Transfer capability injected into the ledger
#[async_trait]
pub trait TokenBank: Send + Sync {
    /// Move `amount` of `token` from `from` into custody
    async fn pull(&self, token: &Token, from: &Address, amount: u128)
        -> Result<(), TransferError>;

    /// Move `amount` of `token` out of custody to `to`
    async fn push(&self, token: &Token, to: &Address, amount: u128) -> Result<(), TransferError>;
}

/// Balance table keyed by token and account
#[derive(Debug, Default)]
struct Balances {
    entries: HashMap<(Token, Address), u128>,
    blocked: HashSet<Address>,
}

impl Balances {
    fn get(&self, token: &Token, account: &Address) -> u128 {
        self.entries
            .get(&(token.clone(), account.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Move funds between two accounts, checking both sides before writing
    fn transfer(
        &mut self,
        token: &Token,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TransferError> {
        // Custody moving into itself would move nothing while the ledger
        // still counts a transfer.
        if from == to {
            return Err(TransferError::Rejected(from.clone()));
        }

        for account in [from, to] {
            if self.blocked.contains(account) {
                return Err(TransferError::Rejected(account.clone()));
            }
        }

        let available = self.get(token, from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                token: token.clone(),
                account: from.clone(),
                available,
                required: amount,
            });
        }

        let credited = self
            .get(token, to)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow(to.clone()))?;

        self.entries
            .insert((token.clone(), from.clone()), available - amount);
        self.entries.insert((token.clone(), to.clone()), credited);
        Ok(())
    }
}

/// In-memory bank used by tests, simulations and the CLI
#[derive(Debug, Clone)]
pub struct InMemoryBank {
    custodian: Address,
    balances: Arc<RwLock<Balances>>,
}

impl InMemoryBank {
    /// Create a bank whose custody account is `custodian`
    pub fn new(custodian: Address) -> Self {
        Self {
            custodian,
            balances: Arc::new(RwLock::new(Balances::default())),
        }
    }

    pub fn custodian(&self) -> &Address {
        &self.custodian
    }

    /// Mint funds into an account
    pub async fn credit(&self, token: &Token, account: &Address, amount: u128) {
        let mut balances = self.balances.write().await;
        let current = balances.get(token, account);
        balances.entries.insert(
            (token.clone(), account.clone()),
            current.saturating_add(amount),
        );
    }

    pub async fn balance_of(&self, token: &Token, account: &Address) -> u128 {
        self.balances.read().await.get(token, account)
    }

    /// Make every transfer touching `account` fail
    pub async fn block(&self, account: &Address) {
        self.balances.write().await.blocked.insert(account.clone());
    }

    pub async fn unblock(&self, account: &Address) {
        self.balances.write().await.blocked.remove(account);
    }
}

#[async_trait]
impl TokenBank for InMemoryBank {
    async fn pull(
        &self,
        token: &Token,
        from: &Address,
        amount: u128,
    ) -> Result<(), TransferError> {
        debug!("Pulling {} {} from {} into custody", amount, token, from);
        self.balances
            .write()
            .await
            .transfer(token, from, &self.custodian, amount)
    }

    async fn push(&self, token: &Token, to: &Address, amount: u128) -> Result<(), TransferError> {
        debug!("Pushing {} {} from custody to {}", amount, token, to);
        self.balances
            .write()
            .await
            .transfer(token, &self.custodian, to, amount)
    }
}
