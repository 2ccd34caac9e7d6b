//! Round Clock
//!
//! Derives round boundaries from wall-clock time alone. Every table's rounds
//! sit on a fixed grid: `k * period + stagger(table)`. Because the grid only
//! depends on (kind, table, time), future rounds can be enumerated and named
//! before any table reaches them.
//!
//! All instants are UTC.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::kind::GameKind;
use super::round_id::{RoundId, TableNumber};

// =============================================================================
// CLOCK SOURCES
// =============================================================================

/// Source of the current instant.
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(start) }
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write().expect("clock lock poisoned") = instant;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}

/// Round an instant down to a multiple of `period` since the unix epoch.
pub fn floor_to_period(instant: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let period_secs = period.num_seconds().max(1);
    let floored = instant.timestamp().div_euclid(period_secs) * period_secs;
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(instant)
}

// =============================================================================
// TIMING
// =============================================================================

/// Fixed round timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Grid period.
    pub period: Duration,
    /// Round length from start to end.
    pub duration: Duration,
    /// Betting closes this long before the end.
    pub close_window: Duration,
    /// Outcome is pre-selected this long before the end when bets exist.
    pub pre_reveal: Duration,
    /// Result stays visible this long after the end before the reset.
    pub grace: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            period: Duration::minutes(5),
            duration: Duration::minutes(5),
            close_window: Duration::seconds(15),
            pre_reveal: Duration::seconds(2),
            grace: Duration::seconds(3),
        }
    }
}

/// Start, close and end of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSchedule {
    /// Betting opens.
    pub start: DateTime<Utc>,
    /// Betting closes.
    pub close: DateTime<Utc>,
    /// Round ends and settles.
    pub end: DateTime<Utc>,
}

impl RoundSchedule {
    /// Whole seconds until the end. Before the start this is the full length.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> i64 {
        if now < self.start {
            return (self.end - self.start).num_seconds();
        }
        if now >= self.end {
            return 0;
        }
        (self.end - now).num_seconds()
    }

    /// Whether the round has started.
    pub fn is_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start
    }
}

// =============================================================================
// ROUND CLOCK
// =============================================================================

/// Computes round boundaries and identifiers for every table.
#[derive(Debug, Clone)]
pub struct RoundClock {
    timing: RoundTiming,
    tables_per_kind: u32,
}

impl RoundClock {
    /// Create a round clock.
    pub fn new(timing: RoundTiming, tables_per_kind: u32) -> Self {
        Self {
            timing,
            tables_per_kind: tables_per_kind.max(1),
        }
    }

    /// Round timing.
    pub fn timing(&self) -> &RoundTiming {
        &self.timing
    }

    /// Tables per kind.
    pub fn tables_per_kind(&self) -> u32 {
        self.tables_per_kind
    }

    /// Offset of a table's grid inside the period.
    ///
    /// Spreads the tables of a kind evenly so they do not all open and close
    /// at once.
    pub fn stagger(&self, table_number: TableNumber) -> Duration {
        let period_secs = self.timing.period.num_seconds().max(1);
        let index = i64::from(table_number.saturating_sub(1) % self.tables_per_kind);
        Duration::seconds(index * period_secs / i64::from(self.tables_per_kind))
    }

    /// Schedule for a round starting at `start`.
    pub fn schedule_at(&self, start: DateTime<Utc>) -> RoundSchedule {
        let end = start + self.timing.duration;
        RoundSchedule {
            start,
            close: end - self.timing.close_window,
            end,
        }
    }

    /// First round of a freshly created table: `floor(now) + stagger`.
    pub fn first_round(&self, table_number: TableNumber, now: DateTime<Utc>) -> RoundSchedule {
        let start = floor_to_period(now, self.timing.period) + self.stagger(table_number);
        self.schedule_at(start)
    }

    /// Round following `previous` on the table's grid.
    ///
    /// Whole periods are skipped when the table fell behind, so the next round
    /// never ends in the past.
    pub fn next_round(&self, previous: &RoundSchedule, now: DateTime<Utc>) -> RoundSchedule {
        let mut start = previous.start + self.timing.period;
        while start + self.timing.duration <= now {
            start += self.timing.period;
        }
        self.schedule_at(start)
    }

    /// Identifier of the round starting at `start` on `table_number`.
    pub fn round_id(&self, kind: GameKind, start: DateTime<Utc>, table_number: TableNumber) -> RoundId {
        RoundId::new(kind, floor_to_period(start, self.timing.period), table_number)
    }

    /// Actual start instant of the round named by `round_id`.
    pub fn start_of(&self, round_id: &RoundId) -> DateTime<Utc> {
        round_id.slot_start() + self.stagger(round_id.table_number())
    }

    /// Whether the identifier names a round this clock could produce.
    pub fn is_valid(&self, round_id: &RoundId) -> bool {
        let period_secs = self.timing.period.num_seconds().max(1);
        round_id.slot_secs().rem_euclid(period_secs) == 0
            && (1..=self.tables_per_kind).contains(&round_id.table_number())
    }

    /// Every round of every table of `kind` whose start lies in `[from, to]`,
    /// ordered by start then table.
    pub fn rounds_between(
        &self,
        kind: GameKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<(RoundId, DateTime<Utc>)> {
        let mut rounds = Vec::new();
        if to < from {
            return rounds;
        }

        for table_number in 1..=self.tables_per_kind {
            let stagger = self.stagger(table_number);
            let mut slot = floor_to_period(from, self.timing.period);
            while slot + stagger < from {
                slot += self.timing.period;
            }
            while slot + stagger <= to {
                rounds.push((RoundId::new(kind, slot, table_number), slot + stagger));
                slot += self.timing.period;
            }
        }

        rounds.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.table_number().cmp(&b.0.table_number())));
        rounds
    }
}

impl Default for RoundClock {
    fn default() -> Self {
        Self::new(RoundTiming::default(), 6)
    }
}
