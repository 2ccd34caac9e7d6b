//! Wallet Collaborator
//!
//! Balances live outside the scheduler. The scheduler only ever debits a
//! stake after admission rules pass and credits payouts during settlement.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::kind::Coins;
use crate::game::state::BettorId;

/// Wallet errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// Balance does not cover the amount.
    #[error("insufficient balance: have {balance}, need {required}")]
    Insufficient {
        /// Current balance.
        balance: Coins,
        /// Requested amount.
        required: Coins,
    },

    /// No account for this bettor.
    #[error("unknown bettor: {0}")]
    UnknownBettor(BettorId),
}

/// Balance store used by admission and settlement.
pub trait Wallet: Send + Sync {
    /// Current balance, `None` for unknown bettors.
    fn balance(&self, bettor: &BettorId) -> Option<Coins>;

    /// Remove `amount`; returns the new balance.
    fn debit(&self, bettor: &BettorId, amount: Coins) -> Result<Coins, WalletError>;

    /// Add `amount`; returns the new balance.
    fn credit(&self, bettor: &BettorId, amount: Coins) -> Result<Coins, WalletError>;
}

/// Process-local wallet.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: RwLock<HashMap<BettorId, Coins>>,
}

impl InMemoryWallet {
    /// Create an empty wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account, or top it up to `initial` if it holds less.
    pub fn open_account(&self, bettor: BettorId, initial: Coins) {
        let mut balances = self.balances.write().expect("wallet lock poisoned");
        let balance = balances.entry(bettor).or_insert(0);
        if *balance < initial {
            *balance = initial;
        }
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.balances.read().expect("wallet lock poisoned").len()
    }
}

impl Wallet for InMemoryWallet {
    fn balance(&self, bettor: &BettorId) -> Option<Coins> {
        self.balances.read().expect("wallet lock poisoned").get(bettor).copied()
    }

    fn debit(&self, bettor: &BettorId, amount: Coins) -> Result<Coins, WalletError> {
        let mut balances = self.balances.write().expect("wallet lock poisoned");
        let balance = balances
            .get_mut(bettor)
            .ok_or_else(|| WalletError::UnknownBettor(bettor.clone()))?;

        if *balance < amount {
            return Err(WalletError::Insufficient {
                balance: *balance,
                required: amount,
            });
        }

        *balance -= amount;
        Ok(*balance)
    }

    fn credit(&self, bettor: &BettorId, amount: Coins) -> Result<Coins, WalletError> {
        let mut balances = self.balances.write().expect("wallet lock poisoned");
        let balance = balances
            .get_mut(bettor)
            .ok_or_else(|| WalletError::UnknownBettor(bettor.clone()))?;

        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }
}
