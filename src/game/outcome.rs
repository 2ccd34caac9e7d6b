//! Outcome Resolver
//!
//! Picks each round's winning number exactly once:
//!
//! 1. Consume the round's override, if any.
//! 2. Honor it only when somebody bet on the forced number.
//! 3. Otherwise draw: with the real-bettor bias probability pick among numbers
//!    chosen by real players, else among all taken numbers, else (no bets at
//!    all) across the whole range.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admin::registry::OverrideRegistry;
use crate::core::kind::{GameKind, Number};
use crate::core::rng::DrawRng;
use crate::game::ledger::BetLedger;
use crate::game::state::TableState;

/// Chance, in basis points, that the draw favors numbers real players chose.
pub const REAL_BETTOR_BIAS_BPS: u32 = 1_600;

/// Where an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Administrator override that matched a bet.
    Override,
    /// Biased draw among real players' numbers.
    RealBettors,
    /// Draw among every taken number.
    TakenNumbers,
    /// Draw across the full range, no bets.
    FullRange,
}

/// Draw an outcome from the bets of a round.
pub fn draw_outcome(ledger: &BetLedger, kind: GameKind, rng: &mut DrawRng, bias_bps: u32) -> (Number, OutcomeSource) {
    let real: Vec<Number> = ledger.real_numbers().into_iter().collect();
    if !real.is_empty() && rng.chance_bps(bias_bps) {
        if let Some(&number) = rng.choose(&real) {
            return (number, OutcomeSource::RealBettors);
        }
    }

    let taken: Vec<Number> = ledger.taken_numbers().into_iter().collect();
    if let Some(&number) = rng.choose(&taken) {
        return (number, OutcomeSource::TakenNumbers);
    }

    let number = rng.next_int(u32::from(kind.max_number()) + 1) as Number;
    (number, OutcomeSource::FullRange)
}

/// Resolves round outcomes against the override registry.
#[derive(Debug, Clone)]
pub struct OutcomeResolver {
    overrides: Arc<OverrideRegistry>,
    real_bettor_bias_bps: u32,
}

impl OutcomeResolver {
    /// Create a resolver.
    pub fn new(overrides: Arc<OverrideRegistry>, real_bettor_bias_bps: u32) -> Self {
        Self {
            overrides,
            real_bettor_bias_bps,
        }
    }

    /// Bias in basis points.
    pub fn real_bettor_bias_bps(&self) -> u32 {
        self.real_bettor_bias_bps
    }

    /// Outcome of the table's current round. Computed on the first call and
    /// returned unchanged afterwards.
    pub fn resolve(&self, table: &mut TableState, now: DateTime<Utc>) -> Number {
        if let Some(outcome) = table.outcome() {
            return outcome;
        }

        let forced = self.overrides.consume(&table.round_id, now);
        let (number, source) = match forced {
            Some(number) if table.ledger.is_taken(number) => (number, OutcomeSource::Override),
            _ => draw_outcome(&table.ledger, table.kind, &mut table.rng, self.real_bettor_bias_bps),
        };

        table.set_outcome(number);
        info!(
            round = %table.round_id,
            outcome = number,
            ?source,
            forced = ?forced,
            bets = table.ledger.len(),
            "outcome resolved"
        );
        number
    }
}
