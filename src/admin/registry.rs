//! Override Registry
//!
//! Administrator-forced outcomes keyed by round identifier. Entries may only
//! be created, edited or cleared while the round's start is more than the
//! lock-out window away. The resolver consumes an entry once; a consumed
//! entry never yields a number again.
//!
//! The map is a `DashMap`, so writes on different rounds never contend and a
//! `consume` is exclusive with a `set`/`clear` on the same round.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::clock::RoundClock;
use crate::core::kind::Number;
use crate::core::round_id::RoundId;
use crate::external::persistence::Persistence;

/// Default lock-out before a round's start.
pub const DEFAULT_LOCKOUT_MINUTES: i64 = 60;

/// Why an override request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OverrideRejected {
    /// Identifier does not parse or is not on the round grid.
    #[error("invalid round id: {0}")]
    InvalidRoundId(String),

    /// Table number outside the configured tables.
    #[error("unknown table {0}")]
    UnknownTable(u32),

    /// Number outside the kind's range.
    #[error("invalid number {number}: must be between 0 and {max}")]
    InvalidNumber {
        /// Requested number.
        number: Number,
        /// Highest valid number.
        max: Number,
    },

    /// Round starts too soon.
    #[error("time expired: overrides must be set at least {minutes} minutes before the round starts")]
    LockoutWindow {
        /// Lock-out length in minutes.
        minutes: i64,
    },

    /// No override for this round.
    #[error("no override for this round")]
    NotFound,

    /// The override was already used by its round.
    #[error("override already consumed")]
    AlreadyConsumed,
}

/// Lifecycle of an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverrideStatus {
    /// Waiting for its round.
    Active,
    /// Taken by the resolver, round not yet settled.
    Consumed,
    /// Round settled.
    Executed {
        /// Final outcome of the round.
        outcome: Number,
        /// Whether the forced number became the outcome.
        honored: bool,
    },
    /// Withdrawn before the round.
    Cleared,
}

/// One override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    /// Target round.
    pub round_id: RoundId,
    /// Forced number.
    pub number: Number,
    /// Who set it.
    pub set_by: String,
    /// When it was last set.
    pub set_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: OverrideStatus,
}

impl OverrideEntry {
    /// Whether the resolver would still pick it up.
    pub fn is_active(&self) -> bool {
        self.status == OverrideStatus::Active
    }
}

/// Audited transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    /// New override.
    Set,
    /// Number changed.
    Updated,
    /// Withdrawn.
    Cleared,
    /// Taken by the resolver.
    Consumed,
    /// Round settled.
    Executed,
    /// Dropped unused after its round had long passed.
    Expired,
}

/// Append-only audit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideHistoryEntry {
    /// Target round.
    pub round_id: RoundId,
    /// Transition.
    pub action: OverrideAction,
    /// Forced number at the time.
    pub number: Option<Number>,
    /// Round outcome, for `Executed`.
    pub outcome: Option<Number>,
    /// Administrator, or `system` for resolver transitions.
    pub actor: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

const SYSTEM_ACTOR: &str = "system";

/// Shared override registry.
pub struct OverrideRegistry {
    clock: RoundClock,
    lockout: Duration,
    entries: DashMap<RoundId, OverrideEntry>,
    persistence: Arc<dyn Persistence>,
}

impl OverrideRegistry {
    /// Create a registry with the given lock-out window.
    pub fn new(clock: RoundClock, lockout: Duration, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            clock,
            lockout,
            entries: DashMap::new(),
            persistence,
        }
    }

    /// Lock-out window.
    pub fn lockout(&self) -> Duration {
        self.lockout
    }

    /// Round clock used for validation.
    pub fn clock(&self) -> &RoundClock {
        &self.clock
    }

    /// Whether a round starting at `start` may still be edited at `now`.
    pub fn is_editable(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        start - now > self.lockout
    }

    fn check_editable(&self, round_id: &RoundId, now: DateTime<Utc>) -> Result<(), OverrideRejected> {
        if round_id.table_number() == 0 || round_id.table_number() > self.clock.tables_per_kind() {
            return Err(OverrideRejected::UnknownTable(round_id.table_number()));
        }
        if !self.clock.is_valid(round_id) {
            return Err(OverrideRejected::InvalidRoundId(round_id.to_string()));
        }
        if !self.is_editable(self.clock.start_of(round_id), now) {
            return Err(OverrideRejected::LockoutWindow {
                minutes: self.lockout.num_minutes(),
            });
        }
        Ok(())
    }

    /// Create or replace the override of a future round.
    pub fn set(
        &self,
        round_id: RoundId,
        number: Number,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OverrideEntry, OverrideRejected> {
        let kind = round_id.kind();
        if !kind.is_valid_number(number) {
            return Err(OverrideRejected::InvalidNumber {
                number,
                max: kind.max_number(),
            });
        }
        self.check_editable(&round_id, now)?;

        let (entry, action) = {
            let mut slot = self.entries.entry(round_id).or_insert_with(|| OverrideEntry {
                round_id,
                number,
                set_by: actor.to_string(),
                set_at: now,
                status: OverrideStatus::Cleared,
            });
            match slot.status {
                OverrideStatus::Consumed | OverrideStatus::Executed { .. } => {
                    return Err(OverrideRejected::AlreadyConsumed)
                }
                OverrideStatus::Active => {
                    let action = OverrideAction::Updated;
                    slot.number = number;
                    slot.set_by = actor.to_string();
                    slot.set_at = now;
                    (slot.clone(), action)
                }
                OverrideStatus::Cleared => {
                    slot.number = number;
                    slot.set_by = actor.to_string();
                    slot.set_at = now;
                    slot.status = OverrideStatus::Active;
                    (slot.clone(), OverrideAction::Set)
                }
            }
        };

        info!(round = %round_id, number, actor, ?action, "override set");
        self.record(round_id, action, Some(number), None, actor, now);
        Ok(entry)
    }

    /// Withdraw the override of a future round.
    pub fn clear(&self, round_id: RoundId, actor: &str, now: DateTime<Utc>) -> Result<OverrideEntry, OverrideRejected> {
        self.check_editable(&round_id, now)?;

        let entry = {
            let mut slot = self
                .entries
                .get_mut(&round_id)
                .ok_or(OverrideRejected::NotFound)?;
            match slot.status {
                OverrideStatus::Active => {
                    slot.status = OverrideStatus::Cleared;
                    slot.clone()
                }
                OverrideStatus::Cleared => return Err(OverrideRejected::NotFound),
                _ => return Err(OverrideRejected::AlreadyConsumed),
            }
        };

        info!(round = %round_id, actor, "override cleared");
        self.record(round_id, OverrideAction::Cleared, Some(entry.number), None, actor, now);
        Ok(entry)
    }

    /// Take the forced number of a round. Returns it at most once.
    pub fn consume(&self, round_id: &RoundId, now: DateTime<Utc>) -> Option<Number> {
        let number = {
            let mut slot = self.entries.get_mut(round_id)?;
            if !slot.is_active() {
                return None;
            }
            slot.status = OverrideStatus::Consumed;
            slot.number
        };

        self.record(*round_id, OverrideAction::Consumed, Some(number), None, SYSTEM_ACTOR, now);
        Some(number)
    }

    /// Annotate a consumed (or still active) override with the round outcome.
    pub fn mark_executed(&self, round_id: &RoundId, outcome: Number, now: DateTime<Utc>) -> Option<OverrideEntry> {
        let entry = {
            let mut slot = self.entries.get_mut(round_id)?;
            match slot.status {
                OverrideStatus::Active | OverrideStatus::Consumed => {
                    let honored = slot.number == outcome;
                    slot.status = OverrideStatus::Executed { outcome, honored };
                    slot.clone()
                }
                _ => return None,
            }
        };

        info!(
            round = %round_id,
            number = entry.number,
            outcome,
            honored = entry.number == outcome,
            "override executed"
        );
        self.record(*round_id, OverrideAction::Executed, Some(entry.number), Some(outcome), SYSTEM_ACTOR, now);
        Some(entry)
    }

    /// Current entry of a round, in any status.
    pub fn get(&self, round_id: &RoundId) -> Option<OverrideEntry> {
        self.entries.get(round_id).map(|e| e.clone())
    }

    /// Forced number of a round if still active.
    pub fn active_number(&self, round_id: &RoundId) -> Option<Number> {
        self.entries
            .get(round_id)
            .filter(|e| e.is_active())
            .map(|e| e.number)
    }

    /// Number of entries in any status.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose round started before `before`.
    ///
    /// Entries that never reached `Executed` (their round was skipped or never
    /// settled) are recorded as expired.
    pub fn prune(&self, before: DateTime<Utc>, now: DateTime<Utc>) {
        let stale: Vec<RoundId> = self
            .entries
            .iter()
            .filter(|e| self.clock.start_of(e.key()) < before)
            .map(|e| *e.key())
            .collect();

        for round_id in stale {
            let Some((_, entry)) = self.entries.remove(&round_id) else {
                continue;
            };
            if matches!(entry.status, OverrideStatus::Active | OverrideStatus::Consumed) {
                warn!(round = %round_id, number = entry.number, "override expired unused");
                self.record(round_id, OverrideAction::Expired, Some(entry.number), None, SYSTEM_ACTOR, now);
            }
        }
    }

    fn record(
        &self,
        round_id: RoundId,
        action: OverrideAction,
        number: Option<Number>,
        outcome: Option<Number>,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        let entry = OverrideHistoryEntry {
            round_id,
            action,
            number,
            outcome,
            actor: actor.to_string(),
            at,
        };
        if let Err(e) = self.persistence.append_override_history(&entry) {
            warn!(round = %round_id, error = %e, "failed to record override history");
        }
    }
}

impl std::fmt::Debug for OverrideRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideRegistry")
            .field("lockout", &self.lockout)
            .field("entries", &self.entries.len())
            .finish()
    }
}
