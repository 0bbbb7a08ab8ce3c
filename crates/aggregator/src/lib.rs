//! # Meridian Bar Aggregator
//!
//! Folds a live stream of quotes into OHLCV bars across several timeframes at
//! once, and periodically pushes snapshots of the still-forming bars to an
//! [`events::EventSink`].
//!
//! ## Architectural Principles
//!
//! - **Hot Path First:** `add_quote` is synchronous and holds a single mutex only
//!   for the fold itself. Nothing on the tick path awaits or publishes while the
//!   lock is held.
//! - **Single Owner:** `BarAggregator` owns every `BarBuilder` and the last
//!   completed `Bar` per (symbol, timeframe). Longer history is someone else's job.
//! - **Best-Effort Broadcast:** Sink failures are logged and never reach callers.
//!
//! ## Public API
//!
//! - `BarBuilder`: the per-(symbol, timeframe) accumulator.
//! - `BarAggregator`: routing, boundary detection, accessors and the broadcast task.
//! - `AggregatorError`: the specific error types that can be returned from this crate.

pub mod aggregator;
pub mod builder;
pub mod error;

pub use aggregator::BarAggregator;
pub use builder::BarBuilder;
pub use error::AggregatorError;
