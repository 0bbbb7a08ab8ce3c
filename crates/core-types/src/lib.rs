//! # Meridian Core Types
//!
//! The shared vocabulary of the workspace: bars, quotes, timeframes, market
//! conditions, signals, orders and per-strategy metrics.
//!
//! ## Architectural Principles
//!
//! - **Layer 0:** This crate depends on no other workspace crate. Everything else
//!   builds on top of it.
//! - **Decimal Prices:** All prices, sizes and P&L figures are `rust_decimal::Decimal`.
//!   Indicator math that needs `f64` converts at the edge (see the `strategies` crate).

pub mod contract;
pub mod enums;
pub mod error;
pub mod structs;
pub mod timeframe;

// Re-export the core types to provide a clean public API.
pub use contract::point_value;
pub use enums::{MarketCondition, OrderSide, OrderType, StrategyStatus};
pub use error::CoreError;
pub use structs::{Bar, OrderRequest, Quote, StrategyMetrics, TradeSignal};
pub use timeframe::Timeframe;
