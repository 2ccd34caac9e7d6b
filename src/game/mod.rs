//! Table Logic Module
//!
//! Synchronous per-table logic. Every function here takes `now` explicitly
//! and runs inside the owning table loop, so nothing in this module locks.
//!
//! ## Module Structure
//!
//! - `state`: Table state, bets, phases, snapshots
//! - `ledger`: Bet ledger and admission rules
//! - `liquidity`: Synthetic bet injection
//! - `outcome`: Outcome resolver (override + weighted draw)
//! - `settlement`: Exactly-once settlement
//! - `events`: Notifications for subscribers
//! - `tick`: One step of the table state machine

pub mod state;
pub mod ledger;
pub mod liquidity;
pub mod outcome;
pub mod settlement;
pub mod events;
pub mod tick;

// Re-export key types
pub use state::{Bet, BettorId, PublicBet, TablePhase, TableSnapshot, TableState};
pub use ledger::{place_player_bet, AdmissionRejected, BetLedger, BetReceipt, BetRequest};
pub use liquidity::LiquidityConfig;
pub use outcome::{OutcomeResolver, OutcomeSource, REAL_BETTOR_BIAS_BPS};
pub use settlement::{BetResolution, SettlementEngine, SettlementRecord, Winner};
pub use events::{TableEvent, TableEventData};
pub use tick::{tick, TickContext, TickResult};
