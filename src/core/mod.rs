//! Core primitives.
//!
//! Game kinds, round identifiers, the round clock, the draw RNG and record
//! hashing. Nothing in here touches the runtime or the collaborators.

pub mod kind;
pub mod round_id;
pub mod clock;
pub mod rng;
pub mod hash;

// Re-export core types
pub use kind::{Coins, GameKind, GameKindConfig, Number};
pub use round_id::{RoundId, RoundIdError, TableNumber};
pub use clock::{Clock, ManualClock, RoundClock, RoundSchedule, RoundTiming, SystemClock};
pub use rng::DrawRng;
pub use hash::RecordHasher;
