//! Persistence Collaborator
//!
//! Audit and history storage. Round state lives in memory inside the table
//! loops; everything written here is for later queries, so callers log write
//! failures and carry on.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::registry::OverrideHistoryEntry;
use crate::core::kind::{Coins, GameKind, Number};
use crate::core::round_id::{RoundId, TableNumber};
use crate::game::settlement::SettlementRecord;
use crate::game::state::BettorId;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File system failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence result alias.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

// =============================================================================
// RECORDS
// =============================================================================

/// Win or lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Number matched the outcome.
    Win,
    /// Number did not match.
    Lose,
}

/// Resolution attached to a history entry by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetResult {
    /// Round outcome.
    pub winning_number: Number,
    /// Win or lose.
    pub status: BetStatus,
    /// `+payout` on a win, `-stake` on a loss.
    pub amount: i64,
    /// When settlement applied it.
    pub resolved_at: DateTime<Utc>,
}

/// A real bettor's bet, pending until settlement resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetHistoryEntry {
    /// Bettor.
    pub bettor: BettorId,
    /// Game kind.
    pub kind: GameKind,
    /// Round.
    pub round_id: RoundId,
    /// Table number.
    pub table_number: TableNumber,
    /// Chosen number.
    pub number: Number,
    /// Stake debited.
    pub stake: Coins,
    /// Admission time.
    pub placed_at: DateTime<Utc>,
    /// Resolution, once settled.
    pub result: Option<BetResult>,
}

impl BetHistoryEntry {
    /// New unresolved entry.
    pub fn pending(
        bettor: BettorId,
        kind: GameKind,
        round_id: RoundId,
        table_number: TableNumber,
        number: Number,
        stake: Coins,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bettor,
            kind,
            round_id,
            table_number,
            number,
            stake,
            placed_at,
            result: None,
        }
    }
}

/// Balance change applied to a winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Bettor credited.
    pub bettor: BettorId,
    /// Game kind.
    pub kind: GameKind,
    /// Round paid out.
    pub round_id: RoundId,
    /// Table number.
    pub table_number: TableNumber,
    /// Winning number.
    pub number: Number,
    /// Stake of the winning bet.
    pub stake: Coins,
    /// Amount credited.
    pub amount: Coins,
    /// Balance after the credit.
    pub new_balance: Coins,
    /// When the credit was applied.
    pub created_at: DateTime<Utc>,
}

/// One round as seen by one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGame {
    /// Game kind.
    pub kind: GameKind,
    /// Round.
    pub round_id: RoundId,
    /// Stake per bet.
    pub stake: Coins,
    /// Numbers the player picked.
    pub user_bets: Vec<Number>,
    /// Outcome, once settled.
    pub winning_number: Option<Number>,
    /// `Win` if any pick won.
    pub status: Option<BetStatus>,
    /// Net amount over all picks.
    pub amount: i64,
    /// Settlement time.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A player's rounds split into unresolved and resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGames {
    /// Rounds still running.
    pub current_games: Vec<UserGame>,
    /// Settled rounds.
    pub game_history: Vec<UserGame>,
}

/// Group a player's history entries per round.
pub fn group_user_games(entries: &[BetHistoryEntry]) -> UserGames {
    let mut grouped: BTreeMap<RoundId, UserGame> = BTreeMap::new();

    for entry in entries {
        let game = grouped.entry(entry.round_id).or_insert_with(|| UserGame {
            kind: entry.kind,
            round_id: entry.round_id,
            stake: entry.stake,
            user_bets: Vec::new(),
            winning_number: None,
            status: None,
            amount: 0,
            resolved_at: None,
        });

        game.user_bets.push(entry.number);
        if let Some(result) = &entry.result {
            game.winning_number = Some(result.winning_number);
            game.amount += result.amount;
            game.resolved_at = Some(result.resolved_at);
            game.status = match (game.status, result.status) {
                (Some(BetStatus::Win), _) | (_, BetStatus::Win) => Some(BetStatus::Win),
                _ => Some(BetStatus::Lose),
            };
        }
    }

    let mut games = UserGames::default();
    for game in grouped.into_values() {
        if game.status.is_some() {
            games.game_history.push(game);
        } else {
            games.current_games.push(game);
        }
    }
    games
}

// =============================================================================
// TRAIT
// =============================================================================

/// History and audit storage.
pub trait Persistence: Send + Sync {
    /// Store a settlement record. A second record for the same round is ignored.
    fn save_settlement(&self, record: &SettlementRecord) -> PersistenceResult<()>;

    /// Append an override transition.
    fn append_override_history(&self, entry: &OverrideHistoryEntry) -> PersistenceResult<()>;

    /// Append a pending bet.
    fn append_bet_history(&self, entry: &BetHistoryEntry) -> PersistenceResult<()>;

    /// Attach a result to the pending entry for (round, bettor, number).
    fn resolve_bet_history(
        &self,
        round_id: &RoundId,
        bettor: &BettorId,
        number: Number,
        result: &BetResult,
    ) -> PersistenceResult<()>;

    /// Append a payout transaction.
    fn append_transaction(&self, entry: &TransactionEntry) -> PersistenceResult<()>;

    /// Most recent settlements, newest first.
    fn settlements(&self, limit: usize) -> Vec<SettlementRecord>;

    /// Settlement of one round.
    fn settlement(&self, round_id: &RoundId) -> Option<SettlementRecord>;

    /// Most recent override transitions, newest first.
    fn override_history(&self, limit: usize) -> Vec<OverrideHistoryEntry>;

    /// Every history entry of a bettor, oldest first.
    fn bet_history(&self, bettor: &BettorId) -> Vec<BetHistoryEntry>;

    /// Every payout of a bettor, oldest first.
    fn transactions(&self, bettor: &BettorId) -> Vec<TransactionEntry>;

    /// A bettor's rounds grouped into current and past games.
    fn user_games(&self, bettor: &BettorId) -> UserGames {
        group_user_games(&self.bet_history(bettor))
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local persistence.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    settlements: RwLock<BTreeMap<RoundId, SettlementRecord>>,
    settlement_order: RwLock<Vec<RoundId>>,
    override_history: RwLock<Vec<OverrideHistoryEntry>>,
    bets: RwLock<Vec<BetHistoryEntry>>,
    transactions: RwLock<Vec<TransactionEntry>>,
}

impl InMemoryPersistence {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored settlements.
    pub fn settlement_count(&self) -> usize {
        self.settlements.read().expect("persistence lock poisoned").len()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_settlement(&self, record: &SettlementRecord) -> PersistenceResult<()> {
        let mut settlements = self.settlements.write().expect("persistence lock poisoned");
        if settlements.contains_key(&record.round_id) {
            return Ok(());
        }
        settlements.insert(record.round_id, record.clone());
        self.settlement_order
            .write()
            .expect("persistence lock poisoned")
            .push(record.round_id);
        Ok(())
    }

    fn append_override_history(&self, entry: &OverrideHistoryEntry) -> PersistenceResult<()> {
        self.override_history
            .write()
            .expect("persistence lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    fn append_bet_history(&self, entry: &BetHistoryEntry) -> PersistenceResult<()> {
        self.bets.write().expect("persistence lock poisoned").push(entry.clone());
        Ok(())
    }

    fn resolve_bet_history(
        &self,
        round_id: &RoundId,
        bettor: &BettorId,
        number: Number,
        result: &BetResult,
    ) -> PersistenceResult<()> {
        let mut bets = self.bets.write().expect("persistence lock poisoned");
        if let Some(entry) = bets.iter_mut().find(|e| {
            e.result.is_none() && &e.round_id == round_id && &e.bettor == bettor && e.number == number
        }) {
            entry.result = Some(result.clone());
        }
        Ok(())
    }

    fn append_transaction(&self, entry: &TransactionEntry) -> PersistenceResult<()> {
        self.transactions
            .write()
            .expect("persistence lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    fn settlements(&self, limit: usize) -> Vec<SettlementRecord> {
        let settlements = self.settlements.read().expect("persistence lock poisoned");
        let order = self.settlement_order.read().expect("persistence lock poisoned");
        order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| settlements.get(id).cloned())
            .collect()
    }

    fn settlement(&self, round_id: &RoundId) -> Option<SettlementRecord> {
        self.settlements
            .read()
            .expect("persistence lock poisoned")
            .get(round_id)
            .cloned()
    }

    fn override_history(&self, limit: usize) -> Vec<OverrideHistoryEntry> {
        let history = self.override_history.read().expect("persistence lock poisoned");
        history.iter().rev().take(limit).cloned().collect()
    }

    fn bet_history(&self, bettor: &BettorId) -> Vec<BetHistoryEntry> {
        let bets = self.bets.read().expect("persistence lock poisoned");
        bets.iter().filter(|e| &e.bettor == bettor).cloned().collect()
    }

    fn transactions(&self, bettor: &BettorId) -> Vec<TransactionEntry> {
        let transactions = self.transactions.read().expect("persistence lock poisoned");
        transactions.iter().filter(|e| &e.bettor == bettor).cloned().collect()
    }
}
