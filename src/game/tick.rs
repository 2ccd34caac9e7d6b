//! Table Tick
//!
//! One step of a table's state machine. Transitions depend only on `now`
//! versus the round's precomputed start / close / end instants:
//!
//! ```text
//! Scheduled ──start──► Open ──close-margin──► Closing ──close──► Closed
//!     ▲                                                            │ end
//!     └────────────── end + grace (reset) ◄──── Finished ◄─────────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::info;

use crate::core::clock::RoundClock;
use crate::game::events::TableEvent;
use crate::game::liquidity::{maybe_inject_synthetic, LiquidityConfig};
use crate::game::outcome::OutcomeResolver;
use crate::game::settlement::{SettlementEngine, SettlementRecord};
use crate::game::state::TableState;

/// Collaborators a tick needs.
pub struct TickContext<'a> {
    /// Round grid.
    pub clock: &'a RoundClock,
    /// Synthetic bet pacing.
    pub liquidity: &'a LiquidityConfig,
    /// Outcome resolver.
    pub resolver: &'a OutcomeResolver,
    /// Settlement engine.
    pub settlement: &'a SettlementEngine,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<TableEvent>,
    /// Settlement produced this tick
    pub settlement: Option<SettlementRecord>,
    /// Table moved to a new round
    pub round_started: bool,
}

/// Advance one table to `now`.
pub fn tick(table: &mut TableState, now: DateTime<Utc>, ctx: &TickContext<'_>) -> TickResult {
    let mut result = TickResult::default();
    let timing = ctx.clock.timing();

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        round = %table.round_id,
        phase = ?table.phase(now, ctx.liquidity.margin),
        bets = table.ledger.len(),
        "tick"
    );

    if now < table.schedule.start {
        return result;
    }

    if !table.finished {
        if let Some(bet) = maybe_inject_synthetic(table, now, ctx.liquidity) {
            let snapshot = table.snapshot(now, ctx.liquidity.margin);
            result.events.push(TableEvent::bet_admitted(snapshot, bet.number, true, now));
        }

        if now >= table.schedule.close && !table.betting_closed {
            table.betting_closed = true;
            info!(round = %table.round_id, bets = table.ledger.len(), "betting closed");
        }

        // pre-reveal
        if table.outcome().is_none()
            && !table.ledger.is_empty()
            && now < table.schedule.end
            && table.schedule.end - now <= timing.pre_reveal
        {
            ctx.resolver.resolve(table, now);
        }

        if now >= table.schedule.end {
            let outcome = ctx.resolver.resolve(table, now);
            let record = ctx.settlement.settle(table, now);
            table.finished = true;

            let event = match &record {
                Some(record) => TableEvent::round_finished(record, now),
                None => TableEvent::round_finished_unsettled(table, outcome, now),
            };
            info!(round = %table.round_id, outcome, "round finished");
            result.events.push(event);
            result.settlement = record;
        }
    }

    if table.finished && now >= table.schedule.end + timing.grace {
        table.reset_for_next_round(ctx.clock, now);
        info!(
            round = %table.round_id,
            starts_at = %table.schedule.start,
            ends_at = %table.schedule.end,
            "new round started"
        );
        result.events.push(TableEvent::new_round_started(table, now));
        result.round_started = true;
    }

    result
}
