//! # Numbers Table Server
//!
//! Round scheduler and settlement engine for multi-table numbers games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  NUMBERS TABLE SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── kind.rs     - Game kinds and their parameters           │
//! │  ├── round_id.rs - Deterministic round identifiers           │
//! │  ├── clock.rs    - Clock trait, round grid                   │
//! │  ├── rng.rs      - Seeded Xorshift128+ draws                 │
//! │  └── hash.rs     - Settlement digests                        │
//! │                                                              │
//! │  game/           - Per-table logic (synchronous)             │
//! │  ├── state.rs    - Table state and snapshots                 │
//! │  ├── ledger.rs   - Bet admission                             │
//! │  ├── liquidity.rs- Synthetic bets                            │
//! │  ├── outcome.rs  - Outcome resolver                          │
//! │  ├── settlement.rs - Exactly-once settlement                 │
//! │  ├── events.rs   - Table events                              │
//! │  └── tick.rs     - Table state machine                       │
//! │                                                              │
//! │  admin/          - Overrides                                 │
//! │  ├── registry.rs - Time-locked override registry             │
//! │  └── control.rs  - Admin control surface                     │
//! │                                                              │
//! │  external/       - Collaborators                             │
//! │  ├── wallet.rs   - Balances                                  │
//! │  ├── persistence.rs - History and audit storage              │
//! │  └── jsonl.rs    - JSON Lines history files                  │
//! │                                                              │
//! │  service/        - Async runtime                             │
//! │  ├── config.rs   - Engine configuration                      │
//! │  ├── table_loop.rs - One task per table                      │
//! │  └── scheduler.rs  - Table scheduler                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Lifecycle
//!
//! Every table runs five-minute rounds on a five-minute grid, offset per
//! table so the tables of one kind do not all close together. Betting
//! closes 15 seconds before the end, the outcome may be fixed 2 seconds
//! before the end, and the result stays visible for a short grace pause
//! before the table resets.
//!
//! Round identifiers depend only on (kind, slot start, table number), so an
//! administrator can name and override a round hours before it exists.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod admin;
pub mod external;
pub mod service;

// Re-export commonly used types
pub use crate::core::clock::{Clock, ManualClock, RoundClock, SystemClock};
pub use crate::core::kind::{GameKind, Number};
pub use crate::core::round_id::RoundId;
pub use crate::game::ledger::{AdmissionRejected, BetReceipt, BetRequest};
pub use crate::game::state::{BettorId, TableSnapshot};
pub use crate::admin::registry::OverrideRejected;
pub use crate::service::{EngineConfig, TableScheduler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
