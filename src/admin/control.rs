//! Administrative Control Surface
//!
//! String-in, data-out operations for an admin UI: browse future rounds, set
//! or clear overrides, read the audit log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admin::registry::{OverrideEntry, OverrideHistoryEntry, OverrideRegistry, OverrideRejected};
use crate::core::clock::Clock;
use crate::core::kind::{GameKind, Number};
use crate::core::round_id::RoundId;
use crate::external::persistence::Persistence;

/// A future round that can still take an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridableRound {
    /// Round identifier.
    pub round_id: RoundId,
    /// Actual start instant.
    pub starts_at: DateTime<Utc>,
    /// Active forced number, if any.
    pub current_override: Option<Number>,
}

/// Admin entry point.
#[derive(Clone)]
pub struct AdminControl {
    registry: Arc<OverrideRegistry>,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl AdminControl {
    /// Create the control surface.
    pub fn new(registry: Arc<OverrideRegistry>, persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            persistence,
            clock,
        }
    }

    /// Every round of `kind` starting in `[from, to]` that is still outside
    /// the lock-out window.
    ///
    /// Computed from the round grid alone, so rounds far in the future are
    /// listed before any table reaches them.
    pub fn list_overridable_rounds(
        &self,
        kind: GameKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<OverridableRound> {
        let now = self.clock.now();
        self.registry
            .clock()
            .rounds_between(kind, from, to)
            .into_iter()
            .filter(|(_, start)| self.registry.is_editable(*start, now))
            .map(|(round_id, starts_at)| OverridableRound {
                round_id,
                starts_at,
                current_override: self.registry.active_number(&round_id),
            })
            .collect()
    }

    /// Force the outcome of a future round.
    pub fn set_override(&self, round_id: &str, number: Number, actor: &str) -> Result<OverrideEntry, OverrideRejected> {
        let round_id = parse_round_id(round_id)?;
        self.registry.set(round_id, number, actor, self.clock.now())
    }

    /// Withdraw the override of a future round.
    pub fn clear_override(&self, round_id: &str, actor: &str) -> Result<OverrideEntry, OverrideRejected> {
        let round_id = parse_round_id(round_id)?;
        self.registry.clear(round_id, actor, self.clock.now())
    }

    /// Current override of a round in any status.
    pub fn get_override(&self, round_id: &str) -> Result<Option<OverrideEntry>, OverrideRejected> {
        let round_id = parse_round_id(round_id)?;
        Ok(self.registry.get(&round_id))
    }

    /// Latest override transitions, newest first.
    pub fn list_override_history(&self, limit: usize) -> Vec<OverrideHistoryEntry> {
        self.persistence.override_history(limit)
    }
}

fn parse_round_id(raw: &str) -> Result<RoundId, OverrideRejected> {
    raw.trim()
        .parse()
        .map_err(|e| OverrideRejected::InvalidRoundId(format!("{raw}: {e}")))
}
