//! Administrative overrides.

pub mod registry;
pub mod control;

pub use registry::{
    OverrideAction, OverrideEntry, OverrideHistoryEntry, OverrideRegistry, OverrideRejected, OverrideStatus,
};
pub use control::{AdminControl, OverridableRound};
