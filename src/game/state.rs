//! Table State Definitions
//!
//! Live, in-memory state of one table and its current round.
//! A table is created once and reset in place at every round boundary.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::clock::{RoundClock, RoundSchedule};
use crate::core::kind::{Coins, GameKind, GameKindConfig, Number};
use crate::core::rng::DrawRng;
use crate::core::round_id::{RoundId, TableNumber};
use crate::game::ledger::BetLedger;

// =============================================================================
// BETTOR ID
// =============================================================================

/// Bettor identity (player account id or synthetic bot id).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BettorId(pub String);

impl BettorId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier of a synthetic bettor with the given display name.
    pub fn synthetic(name: &str) -> Self {
        Self(format!("bot_{name}"))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BettorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// BET
// =============================================================================

/// One accepted bet in the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Who placed it.
    pub bettor: BettorId,
    /// Name shown to other players.
    pub display_name: String,
    /// Chosen number.
    pub number: Number,
    /// Stake debited.
    pub stake: Coins,
    /// When it was admitted.
    pub placed_at: DateTime<Utc>,
    /// Placed by the liquidity injector.
    pub synthetic: bool,
}

// =============================================================================
// PHASE
// =============================================================================

/// Table phase within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePhase {
    /// Waiting for the round start.
    Scheduled,
    /// Accepting bets, synthetic filling active.
    Open,
    /// Still accepting bets, close is near and synthetic filling has stopped.
    Closing,
    /// No further bets.
    Closed,
    /// Outcome final and settled; waiting out the grace pause.
    Finished,
}

// =============================================================================
// TABLE STATE
// =============================================================================

/// Live state of one table.
#[derive(Debug)]
pub struct TableState {
    /// Game kind.
    pub kind: GameKind,
    /// Table number within the kind (1-based).
    pub table_number: TableNumber,
    /// Kind parameters.
    pub config: GameKindConfig,
    /// Current round identifier.
    pub round_id: RoundId,
    /// Current round boundaries.
    pub schedule: RoundSchedule,
    /// Bets of the current round.
    pub ledger: BetLedger,
    /// Betting-closed flag; irreversible within a round.
    pub betting_closed: bool,
    /// Finished flag; irreversible within a round.
    pub finished: bool,
    /// Last synthetic bet of this round.
    pub last_synthetic_at: Option<DateTime<Utc>>,
    /// Rounds completed since start-up.
    pub rounds_played: u64,
    /// Draw RNG for outcomes and synthetic picks.
    pub rng: DrawRng,
    outcome: Option<Number>,
}

impl TableState {
    /// Create a table with its first round scheduled from `now`.
    pub fn new(
        kind: GameKind,
        table_number: TableNumber,
        config: GameKindConfig,
        clock: &RoundClock,
        now: DateTime<Utc>,
        rng: DrawRng,
    ) -> Self {
        let schedule = clock.first_round(table_number, now);
        Self {
            kind,
            table_number,
            config,
            round_id: clock.round_id(kind, schedule.start, table_number),
            schedule,
            ledger: BetLedger::default(),
            betting_closed: false,
            finished: false,
            last_synthetic_at: None,
            rounds_played: 0,
            rng,
            outcome: None,
        }
    }

    /// Resolved outcome, if any.
    pub fn outcome(&self) -> Option<Number> {
        self.outcome
    }

    /// Set the outcome once. Returns false (and changes nothing) when it was
    /// already set.
    pub fn set_outcome(&mut self, number: Number) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(number);
        true
    }

    /// Whether a bet arriving at `now` may still be admitted.
    pub fn accepting_bets(&self, now: DateTime<Utc>) -> bool {
        !self.finished && !self.betting_closed && now < self.schedule.close
    }

    /// Free slots left this round.
    pub fn slots_available(&self) -> usize {
        self.config.capacity.saturating_sub(self.ledger.len())
    }

    /// Phase at `now`. `closing_window` is how long before close the table
    /// counts as closing.
    pub fn phase(&self, now: DateTime<Utc>, closing_window: Duration) -> TablePhase {
        if self.finished {
            TablePhase::Finished
        } else if self.betting_closed || now >= self.schedule.close {
            TablePhase::Closed
        } else if now < self.schedule.start {
            TablePhase::Scheduled
        } else if self.schedule.close - now <= closing_window {
            TablePhase::Closing
        } else {
            TablePhase::Open
        }
    }

    /// Reset every per-round field and move to the next round on the grid.
    pub fn reset_for_next_round(&mut self, clock: &RoundClock, now: DateTime<Utc>) {
        self.schedule = clock.next_round(&self.schedule, now);
        self.round_id = clock.round_id(self.kind, self.schedule.start, self.table_number);
        self.ledger.clear();
        self.betting_closed = false;
        self.finished = false;
        self.last_synthetic_at = None;
        self.outcome = None;
        self.rounds_played += 1;
    }

    /// Read-only view for queries and notifications.
    pub fn snapshot(&self, now: DateTime<Utc>, closing_window: Duration) -> TableSnapshot {
        TableSnapshot {
            kind: self.kind,
            table_number: self.table_number,
            round_id: self.round_id,
            phase: self.phase(now, closing_window),
            players: self.ledger.len(),
            max_players: self.config.capacity,
            slots_available: self.slots_available(),
            time_remaining: self.schedule.time_remaining(now),
            betting_closed: self.betting_closed || now >= self.schedule.close,
            accepting_bets: self.accepting_bets(now),
            starts_at: self.schedule.start,
            ends_at: self.schedule.end,
            outcome: if self.finished { self.outcome } else { None },
            bets: self
                .ledger
                .bets()
                .iter()
                .map(|b| PublicBet {
                    display_name: b.display_name.clone(),
                    number: b.number,
                })
                .collect(),
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A bet as shown to other players.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicBet {
    /// Display name.
    pub display_name: String,
    /// Chosen number.
    pub number: Number,
}

/// Read-only table view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Game kind.
    pub kind: GameKind,
    /// Table number.
    pub table_number: TableNumber,
    /// Current round.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: TablePhase,
    /// Bets placed this round.
    pub players: usize,
    /// Table capacity.
    pub max_players: usize,
    /// Free slots.
    pub slots_available: usize,
    /// Seconds until the round ends.
    pub time_remaining: i64,
    /// Betting closed.
    pub betting_closed: bool,
    /// Bets would currently be admitted (capacity aside).
    pub accepting_bets: bool,
    /// Round start.
    pub starts_at: DateTime<Utc>,
    /// Round end.
    pub ends_at: DateTime<Utc>,
    /// Outcome, once the round has finished.
    pub outcome: Option<Number>,
    /// Bets of the round.
    pub bets: Vec<PublicBet>,
}
