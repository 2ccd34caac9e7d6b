//! Engine Configuration
//!
//! Defaults reproduce the production game: five-minute rounds on a
//! five-minute grid, six tables per kind, a one-hour override lock-out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::admin::registry::DEFAULT_LOCKOUT_MINUTES;
use crate::core::clock::{RoundClock, RoundTiming};
use crate::core::kind::{GameKind, GameKindConfig};
use crate::game::liquidity::LiquidityConfig;
use crate::game::outcome::REAL_BETTOR_BIAS_BPS;

/// Default tables per game kind.
pub const DEFAULT_TABLES_PER_KIND: u32 = 6;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Round timing.
    pub timing: RoundTiming,
    /// Synthetic bet pacing.
    pub liquidity: LiquidityConfig,
    /// Override lock-out before a round's start.
    pub override_lockout: Duration,
    /// Chance, in basis points, of drawing among real players' numbers.
    pub real_bettor_bias_bps: u32,
    /// Tables per kind.
    pub tables_per_kind: u32,
    /// Fixed draw entropy; random when `None`.
    pub draw_seed: Option<u64>,
    /// JSON Lines history directory; in-memory history when `None`.
    pub history_dir: Option<PathBuf>,
    /// Table loop cadence.
    pub tick_interval: StdDuration,
    /// Pause after a failed tick.
    pub failure_backoff: StdDuration,
    /// Command queue depth per table.
    pub command_buffer: usize,
    /// Event channel depth.
    pub event_buffer: usize,
    /// Kinds to run and their parameters.
    pub kinds: BTreeMap<GameKind, GameKindConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timing: RoundTiming::default(),
            liquidity: LiquidityConfig::default(),
            override_lockout: Duration::minutes(DEFAULT_LOCKOUT_MINUTES),
            real_bettor_bias_bps: REAL_BETTOR_BIAS_BPS,
            tables_per_kind: DEFAULT_TABLES_PER_KIND,
            draw_seed: None,
            history_dir: None,
            tick_interval: StdDuration::from_secs(1),
            failure_backoff: StdDuration::from_secs(1),
            command_buffer: 64,
            event_buffer: 1024,
            kinds: GameKind::ALL.iter().map(|k| (*k, k.default_config())).collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables:
    ///
    /// | variable | field |
    /// |---|---|
    /// | `TABLES_PER_KIND` | `tables_per_kind` |
    /// | `OVERRIDE_LOCKOUT_MINUTES` | `override_lockout` |
    /// | `REAL_BETTOR_BIAS_BPS` | `real_bettor_bias_bps` (0..=10000) |
    /// | `ROUND_DRAW_SEED` | `draw_seed` |
    /// | `HISTORY_DIR` | `history_dir` |
    /// | `TICK_INTERVAL_MS` | `tick_interval` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tables_per_kind: env_parse("TABLES_PER_KIND")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.tables_per_kind),
            override_lockout: env_parse("OVERRIDE_LOCKOUT_MINUTES")
                .map(Duration::minutes)
                .unwrap_or(defaults.override_lockout),
            real_bettor_bias_bps: env_parse("REAL_BETTOR_BIAS_BPS")
                .filter(|bps: &u32| *bps <= 10_000)
                .unwrap_or(defaults.real_bettor_bias_bps),
            draw_seed: env_parse("ROUND_DRAW_SEED").or(defaults.draw_seed),
            history_dir: std::env::var("HISTORY_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or(defaults.history_dir.clone()),
            tick_interval: env_parse("TICK_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(StdDuration::from_millis)
                .unwrap_or(defaults.tick_interval),
            ..defaults
        }
    }

    /// Round clock for this configuration.
    pub fn round_clock(&self) -> RoundClock {
        RoundClock::new(self.timing, self.tables_per_kind)
    }

    /// Parameters of a kind, falling back to its built-in defaults.
    pub fn kind_config(&self, kind: GameKind) -> GameKindConfig {
        self.kinds.get(&kind).cloned().unwrap_or_else(|| kind.default_config())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
