//! Table Events
//!
//! Plain-data notifications emitted after table state changes. Delivery to
//! clients is up to whoever subscribes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::kind::{GameKind, Number};
use crate::core::round_id::{RoundId, TableNumber};
use crate::game::settlement::{SettlementRecord, Winner};
use crate::game::state::{TableSnapshot, TableState};

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableEventData {
    /// A bet was admitted (player or synthetic).
    BetAdmitted {
        /// Table right after admission.
        snapshot: TableSnapshot,
        /// Number taken.
        number: Number,
        /// Placed by the liquidity injector.
        synthetic: bool,
    },

    /// Round finished and settled.
    RoundFinished {
        /// Winning number.
        outcome: Number,
        /// Paid winners.
        winners: Vec<Winner>,
    },

    /// Table moved to its next round.
    NewRoundStarted {
        /// Next round start.
        starts_at: DateTime<Utc>,
        /// Next round end.
        ends_at: DateTime<Utc>,
    },
}

/// Event with its table and round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEvent {
    /// Game kind.
    pub kind: GameKind,
    /// Table number.
    pub table_number: TableNumber,
    /// Round the event belongs to (the new round for `NewRoundStarted`).
    pub round_id: RoundId,
    /// Emission time.
    pub at: DateTime<Utc>,
    /// Payload.
    pub data: TableEventData,
}

impl TableEvent {
    /// Bet admitted.
    pub fn bet_admitted(snapshot: TableSnapshot, number: Number, synthetic: bool, at: DateTime<Utc>) -> Self {
        Self {
            kind: snapshot.kind,
            table_number: snapshot.table_number,
            round_id: snapshot.round_id,
            at,
            data: TableEventData::BetAdmitted {
                snapshot,
                number,
                synthetic,
            },
        }
    }

    /// Round finished, from its settlement record.
    pub fn round_finished(record: &SettlementRecord, at: DateTime<Utc>) -> Self {
        Self {
            kind: record.kind,
            table_number: record.table_number,
            round_id: record.round_id,
            at,
            data: TableEventData::RoundFinished {
                outcome: record.outcome,
                winners: record.winners(),
            },
        }
    }

    /// Round finished without a settlement record (already settled earlier).
    pub fn round_finished_unsettled(table: &TableState, outcome: Number, at: DateTime<Utc>) -> Self {
        Self {
            kind: table.kind,
            table_number: table.table_number,
            round_id: table.round_id,
            at,
            data: TableEventData::RoundFinished {
                outcome,
                winners: Vec::new(),
            },
        }
    }

    /// New round on `table`.
    pub fn new_round_started(table: &TableState, at: DateTime<Utc>) -> Self {
        Self {
            kind: table.kind,
            table_number: table.table_number,
            round_id: table.round_id,
            at,
            data: TableEventData::NewRoundStarted {
                starts_at: table.schedule.start,
                ends_at: table.schedule.end,
            },
        }
    }

    /// Short name of the payload.
    pub fn name(&self) -> &'static str {
        match self.data {
            TableEventData::BetAdmitted { .. } => "bet_admitted",
            TableEventData::RoundFinished { .. } => "round_finished",
            TableEventData::NewRoundStarted { .. } => "new_round_started",
        }
    }
}
