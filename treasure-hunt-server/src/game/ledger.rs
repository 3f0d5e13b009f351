//! Ledger Collaborator
//!
//! The engine never holds currency. Stakes move from a funded account into
//! a pool kept by the ledger, and payouts are transfers out of that pool
//! back to accounts. Any transfer may fail; a failed transfer leaves the
//! ledger untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::state::Identity;

/// Currency amount in the smallest unit.
pub type Amount = u128;

/// Transfer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Pool holds less than requested.
    #[error("pool holds {available}, cannot transfer {requested}")]
    InsufficientPool {
        /// Amount requested.
        requested: Amount,
        /// Amount in the pool.
        available: Amount,
    },

    /// Paying account holds less than requested.
    #[error("account {account} holds {available}, cannot pay {requested}")]
    InsufficientFunds {
        /// Paying account.
        account: Identity,
        /// Amount requested.
        requested: Amount,
        /// Amount the account holds.
        available: Amount,
    },

    /// Recipient refused the payment.
    #[error("recipient {0} rejected the transfer")]
    Rejected(Identity),

    /// Balance arithmetic overflowed.
    #[error("balance overflow")]
    Overflow,

    /// This ledger is funded externally.
    #[error("ledger does not accept direct credits")]
    CreditUnsupported,
}

/// Currency substrate the engine settles against.
pub trait Ledger: Send {
    /// Move a stake from `from` to the pool. All-or-nothing.
    fn deposit(&mut self, from: &Identity, amount: Amount) -> Result<(), TransferError>;

    /// Pay `amount` from the pool to `to`. All-or-nothing.
    fn transfer(&mut self, to: &Identity, amount: Amount) -> Result<(), TransferError>;

    /// Current pool balance.
    fn pool_balance(&self) -> Amount;

    /// Balance held by an account outside the pool.
    fn balance_of(&self, account: &Identity) -> Amount;

    /// Add funds to `account` from outside the game.
    fn credit(&mut self, account: &Identity, amount: Amount) -> Result<(), TransferError> {
        let _ = (account, amount);
        Err(TransferError::CreditUnsupported)
    }

    /// Persistable balances, for ledgers that live in process memory.
    fn export(&self) -> Option<LedgerSnapshot> {
        None
    }
}

/// Persisted form of an [`InMemoryLedger`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Pool balance.
    pub pool: Amount,
    /// Account balances, sorted by identity.
    pub balances: Vec<(Identity, Amount)>,
}

/// In-process ledger.
///
/// Accounts must be credited before they can stake. Accounts can also be
/// marked as rejecting incoming transfers to model recipients that refuse
/// payment.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    pool: Amount,
    balances: BTreeMap<Identity, Amount>,
    rejecting: BTreeSet<Identity>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger whose pool already holds `pool`.
    pub fn with_pool(pool: Amount) -> Self {
        Self { pool, ..Self::default() }
    }

    /// Rebuild a ledger from persisted balances.
    pub fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        Self {
            pool: snapshot.pool,
            balances: snapshot.balances.iter().copied().filter(|(_, b)| *b > 0).collect(),
            rejecting: BTreeSet::new(),
        }
    }

    /// Make every transfer to `account` fail.
    pub fn reject_incoming(&mut self, account: Identity) {
        self.rejecting.insert(account);
    }

    /// Undo [`reject_incoming`](Self::reject_incoming).
    pub fn accept_incoming(&mut self, account: &Identity) {
        self.rejecting.remove(account);
    }

    fn add_to(&mut self, account: &Identity, amount: Amount) -> Result<(), TransferError> {
        let current = self.balance_of(account);
        let updated = current.checked_add(amount).ok_or(TransferError::Overflow)?;
        self.balances.insert(*account, updated);
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn deposit(&mut self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        let available = self.balance_of(from);
        if amount > available {
            return Err(TransferError::InsufficientFunds {
                account: *from,
                requested: amount,
                available,
            });
        }
        let pool = self.pool.checked_add(amount).ok_or(TransferError::Overflow)?;

        self.pool = pool;
        match available - amount {
            0 => self.balances.remove(from),
            rest => self.balances.insert(*from, rest),
        };
        Ok(())
    }

    fn transfer(&mut self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        if self.rejecting.contains(to) {
            return Err(TransferError::Rejected(*to));
        }
        if amount > self.pool {
            return Err(TransferError::InsufficientPool {
                requested: amount,
                available: self.pool,
            });
        }
        self.add_to(to, amount)?;
        self.pool -= amount;
        Ok(())
    }

    fn pool_balance(&self) -> Amount {
        self.pool
    }

    fn balance_of(&self, account: &Identity) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn credit(&mut self, account: &Identity, amount: Amount) -> Result<(), TransferError> {
        self.add_to(account, amount)
    }

    fn export(&self) -> Option<LedgerSnapshot> {
        Some(LedgerSnapshot {
            pool: self.pool,
            balances: self.balances.iter().map(|(id, b)| (*id, *b)).collect(),
        })
    }
}
