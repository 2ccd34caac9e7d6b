//! Bet Ledger
//!
//! Bets of one table's current round and the admission rules guarding them.
//!
//! Admission is always called from the table's own loop, so the whole
//! validate-debit-append sequence runs as one critical section per table.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::kind::{Coins, GameKind, GameKindConfig, Number};
use crate::core::round_id::{RoundId, TableNumber};
use crate::external::persistence::{BetHistoryEntry, Persistence};
use crate::external::wallet::{Wallet, WalletError};
use crate::game::state::{Bet, BettorId, TableState};

/// Why a bet was not admitted. Never a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdmissionRejected {
    /// Number outside the kind's range.
    #[error("invalid number {number}: must be between 0 and {max}")]
    InvalidNumber {
        /// Requested number.
        number: Number,
        /// Highest valid number.
        max: Number,
    },

    /// Someone already holds this number this round.
    #[error("number already taken")]
    NumberTaken {
        /// Requested number.
        number: Number,
    },

    /// Bettor already holds the per-round maximum.
    #[error("maximum {limit} bets per user")]
    BettorLimit {
        /// Per-round maximum.
        limit: usize,
    },

    /// Capacity reached.
    #[error("table full")]
    TableFull,

    /// Round closed or finished.
    #[error("betting closed")]
    BettingClosed,

    /// Wallet cannot cover the stake.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Wallet has no account for the bettor.
    #[error("unknown bettor")]
    UnknownBettor,

    /// No table with this kind and number.
    #[error("unknown table")]
    UnknownTable,

    /// No table of the kind is accepting bets.
    #[error("no open game table")]
    NoOpenTable,

    /// The table loop is not running.
    #[error("table unavailable")]
    TableUnavailable,
}

/// A player's request to bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRequest {
    /// Bettor.
    pub bettor: BettorId,
    /// Name shown at the table.
    pub display_name: String,
    /// Chosen number.
    pub number: Number,
    /// Client idempotency key; a repeat within the round returns the first
    /// receipt without debiting again.
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

impl BetRequest {
    /// Request without idempotency key; display name defaults to the id.
    pub fn new(bettor: BettorId, number: Number) -> Self {
        Self {
            display_name: bettor.0.clone(),
            bettor,
            number,
            request_id: None,
        }
    }

    /// Attach an idempotency key.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Proof of an admitted bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Game kind.
    pub kind: GameKind,
    /// Table number.
    pub table_number: TableNumber,
    /// Chosen number.
    pub number: Number,
    /// Stake debited.
    pub stake: Coins,
    /// Admission time.
    pub placed_at: DateTime<Utc>,
    /// Balance after the debit.
    pub new_balance: Coins,
    /// Echoed idempotency key.
    pub request_id: Option<Uuid>,
}

/// Bets of the current round.
#[derive(Debug, Default)]
pub struct BetLedger {
    bets: Vec<Bet>,
    receipts: HashMap<Uuid, BetReceipt>,
}

impl BetLedger {
    /// Check every admission rule, in priority order.
    pub fn validate(
        &self,
        kind: GameKind,
        config: &GameKindConfig,
        bettor: &BettorId,
        number: Number,
        synthetic: bool,
        accepting: bool,
    ) -> Result<(), AdmissionRejected> {
        if !kind.is_valid_number(number) {
            return Err(AdmissionRejected::InvalidNumber {
                number,
                max: kind.max_number(),
            });
        }

        if self.is_taken(number) {
            return Err(AdmissionRejected::NumberTaken { number });
        }

        if !synthetic && self.count_for(bettor) >= config.max_bets_per_bettor {
            return Err(AdmissionRejected::BettorLimit {
                limit: config.max_bets_per_bettor,
            });
        }

        if self.bets.len() >= config.capacity {
            return Err(AdmissionRejected::TableFull);
        }

        if !accepting {
            return Err(AdmissionRejected::BettingClosed);
        }

        Ok(())
    }

    /// Validate and append.
    pub fn admit(
        &mut self,
        kind: GameKind,
        config: &GameKindConfig,
        bet: Bet,
        accepting: bool,
    ) -> Result<&Bet, AdmissionRejected> {
        self.validate(kind, config, &bet.bettor, bet.number, bet.synthetic, accepting)?;
        self.bets.push(bet);
        Ok(&self.bets[self.bets.len() - 1])
    }

    /// Receipt of an earlier request with the same key.
    pub fn receipt(&self, request_id: &Uuid) -> Option<&BetReceipt> {
        self.receipts.get(request_id)
    }

    /// Bets in admission order.
    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    /// Number of bets.
    pub fn len(&self) -> usize {
        self.bets.len()
    }

    /// No bets yet.
    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Whether a number is taken.
    pub fn is_taken(&self, number: Number) -> bool {
        self.bets.iter().any(|b| b.number == number)
    }

    /// Bets held by one bettor.
    pub fn count_for(&self, bettor: &BettorId) -> usize {
        self.bets.iter().filter(|b| &b.bettor == bettor).count()
    }

    /// Numbers with at least one bet, ascending.
    pub fn taken_numbers(&self) -> BTreeSet<Number> {
        self.bets.iter().map(|b| b.number).collect()
    }

    /// Numbers picked by real bettors, ascending.
    pub fn real_numbers(&self) -> BTreeSet<Number> {
        self.bets.iter().filter(|b| !b.synthetic).map(|b| b.number).collect()
    }

    /// Numbers of the kind's range nobody picked yet, ascending.
    pub fn free_numbers(&self, kind: GameKind) -> Vec<Number> {
        kind.numbers().filter(|n| !self.is_taken(*n)).collect()
    }

    /// Drop every bet and receipt.
    pub fn clear(&mut self) {
        self.bets.clear();
        self.receipts.clear();
    }
}

/// Admit a real player's bet: validate, debit the wallet, append, and record
/// a pending history entry.
///
/// The wallet is only debited once every rule has passed, and a repeated
/// `request_id` returns the first receipt without touching the wallet.
pub fn place_player_bet(
    table: &mut TableState,
    request: BetRequest,
    now: DateTime<Utc>,
    wallet: &dyn Wallet,
    persistence: &dyn Persistence,
) -> Result<BetReceipt, AdmissionRejected> {
    if let Some(receipt) = request.request_id.and_then(|id| table.ledger.receipt(&id)) {
        debug!(round = %table.round_id, bettor = %request.bettor, "duplicate bet request");
        return Ok(receipt.clone());
    }

    let accepting = table.accepting_bets(now);
    table.ledger.validate(
        table.kind,
        &table.config,
        &request.bettor,
        request.number,
        false,
        accepting,
    )?;

    let stake = table.config.stake;
    let new_balance = wallet.debit(&request.bettor, stake).map_err(|e| match e {
        WalletError::Insufficient { .. } => AdmissionRejected::InsufficientBalance,
        WalletError::UnknownBettor(_) => AdmissionRejected::UnknownBettor,
    })?;

    let bet = Bet {
        bettor: request.bettor.clone(),
        display_name: request.display_name.clone(),
        number: request.number,
        stake,
        placed_at: now,
        synthetic: false,
    };
    if let Err(rejected) = table.ledger.admit(table.kind, &table.config, bet, accepting) {
        // validated above under the same exclusive borrow
        warn!(round = %table.round_id, ?rejected, "bet rejected after debit, refunding");
        if let Err(e) = wallet.credit(&request.bettor, stake) {
            warn!(bettor = %request.bettor, error = %e, "refund failed");
        }
        return Err(rejected);
    }

    let entry = BetHistoryEntry::pending(
        request.bettor.clone(),
        table.kind,
        table.round_id,
        table.table_number,
        request.number,
        stake,
        now,
    );
    if let Err(e) = persistence.append_bet_history(&entry) {
        warn!(round = %table.round_id, error = %e, "failed to record bet history");
    }

    let receipt = BetReceipt {
        round_id: table.round_id,
        kind: table.kind,
        table_number: table.table_number,
        number: request.number,
        stake,
        placed_at: now,
        new_balance,
        request_id: request.request_id,
    };
    if let Some(id) = request.request_id {
        table.ledger.receipts.insert(id, receipt.clone());
    }

    debug!(
        round = %table.round_id,
        bettor = %request.bettor,
        number = request.number,
        "bet admitted"
    );
    Ok(receipt)
}
