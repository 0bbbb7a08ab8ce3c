//! # Meridian Engine
//!
//! The strategy manager: a registry of named strategy constructors, one task
//! per active strategy under a concurrency cap, write-through persistence of
//! each strategy's enabled flag, symbols and settings, and optional periodic
//! auto-selection by market condition and track record.
//!
//! Caller-facing operations return `Result<String, ManagerError>`; the `Ok`
//! string and `ManagerError::to_string()` are both meant for an operator.

pub mod error;
pub mod manager;
pub mod runner;
pub mod selector;
pub mod status;
pub mod summary;
pub mod view;

pub use error::ManagerError;
pub use manager::{ManagerResult, StrategyConfigUpdate, StrategyManager};
pub use runner::{run_pass, run_strategy, SharedStrategy};
pub use status::StatusHandle;
pub use summary::{AggregatedMetrics, ManagerStatus, StrategySummary};
pub use view::{StrategyView, ViewHandle};
