//! Synthetic Liquidity
//!
//! Fills quiet tables with bot bets while betting is open. Bots go through
//! the same ledger checks as players (minus the per-bettor limit), never touch
//! the wallet and never reach personal history or payouts.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::game::state::{Bet, BettorId, TableState};

/// Display-name prefixes of synthetic bettors.
pub const BOT_NAME_PREFIXES: [&str; 8] = [
    "Amit", "Sanjay", "Riya", "Kunal", "Anita", "Rohit", "Meera", "Neeraj",
];

/// Injection pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityConfig {
    /// Minimum gap between two synthetic bets on one table.
    pub interval: Duration,
    /// No injection once close is this near.
    pub margin: Duration,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            interval: Duration::seconds(15),
            margin: Duration::seconds(30),
        }
    }
}

impl LiquidityConfig {
    /// Whether a synthetic bet may be placed at `now`.
    pub fn is_due(&self, table: &TableState, now: DateTime<Utc>) -> bool {
        if !table.schedule.is_started(now) || !table.accepting_bets(now) {
            return false;
        }
        if table.slots_available() == 0 || table.schedule.close - now <= self.margin {
            return false;
        }
        match table.last_synthetic_at {
            Some(last) => now - last >= self.interval,
            None => true,
        }
    }
}

/// Place one synthetic bet if the table is due for one.
///
/// The number is drawn uniformly from those still free; when none are left
/// nothing happens.
pub fn maybe_inject_synthetic(table: &mut TableState, now: DateTime<Utc>, config: &LiquidityConfig) -> Option<Bet> {
    if !config.is_due(table, now) {
        return None;
    }

    let free = table.ledger.free_numbers(table.kind);
    let number = *table.rng.choose(&free)?;
    let prefix = table.rng.choose(&BOT_NAME_PREFIXES).copied().unwrap_or("Bot");
    let name = format!("{prefix}{}", 100 + table.rng.next_int(900));

    let bet = Bet {
        bettor: BettorId::synthetic(&name),
        display_name: name,
        number,
        stake: table.config.stake,
        placed_at: now,
        synthetic: true,
    };

    let accepting = table.accepting_bets(now);
    match table.ledger.admit(table.kind, &table.config, bet, accepting) {
        Ok(bet) => {
            let bet = bet.clone();
            table.last_synthetic_at = Some(now);
            debug!(round = %table.round_id, number, name = %bet.display_name, "synthetic bet");
            Some(bet)
        }
        Err(rejected) => {
            debug!(round = %table.round_id, ?rejected, "synthetic bet skipped");
            None
        }
    }
}
