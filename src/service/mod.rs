//! Async Runtime Layer
//!
//! Table loops, the scheduler that owns them, and engine configuration.
//! This layer reads the wall clock; everything below it takes `now` as input.

pub mod config;
pub mod table_loop;
pub mod scheduler;

pub use config::EngineConfig;
pub use table_loop::{TableCommand, TableHandle, TableServices, TickFailure};
pub use scheduler::{SchedulerError, TableScheduler};
