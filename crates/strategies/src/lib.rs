//! # Meridian Strategy Library
//!
//! This crate contains the trading logic driven by the strategy manager. It
//! defines the `Strategy` capability trait, the `StrategyBase` every variant
//! embeds, and the built-in variants.
//!
//! ## Architectural Principles
//!
//! - **Capability interface:** the manager only ever sees `dyn Strategy`. It asks
//!   the cheap synchronous gate first, then the async `analyze`/`execute` pair,
//!   then `manage_positions` once per pass.
//! - **Collaborators are injected:** strategies reach market data and orders
//!   through an `Arc<dyn BrokerClient>` handed in at construction.
//! - **Typed settings:** each variant owns a typed parameter struct; the JSON
//!   form exists only for persistence and is validated on the way back in.
//!
//! ## Public API
//!
//! - `Strategy`: The core trait all strategies implement.
//! - `StrategyBase`, `TradeGate`, `TrackedPosition`: shared state and checks.
//! - `create_strategy`, `builtin_factories`, `StrategyFactory`: construction.
//! - The concrete strategy structs themselves (`TrendFollowing`, `MeanReversion`).

pub mod base;
pub mod error;
pub mod factory;
pub mod indicators;
pub mod mean_reversion;
pub mod trend_following;

pub use base::{CommonSettings, StrategyBase, TrackedPosition, TradeGate};
pub use error::StrategyError;
pub use factory::{builtin_factories, create_strategy, StrategyFactory, BUILTIN_STRATEGIES};
pub use mean_reversion::MeanReversion;
pub use trend_following::TrendFollowing;

use async_trait::async_trait;
use chrono::Local;
use configuration::StrategyConfig;
use core_types::{MarketCondition, StrategyMetrics, TradeSignal};
use serde_json::Value;

/// The core trait that all trading strategies must implement.
///
/// The `&mut self` on the async methods is crucial: strategies keep their own
/// state (tracked positions, condition cache, counters). The manager serialises
/// access to each instance, so implementations need no interior locking.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn base(&self) -> &StrategyBase;

    fn base_mut(&mut self) -> &mut StrategyBase;

    fn config(&self) -> &StrategyConfig {
        &self.base().config
    }

    fn metrics(&self) -> &StrategyMetrics {
        &self.base().metrics
    }

    /// Cheap synchronous pre-check, evaluated against local wall-clock time.
    fn should_trade(&self, symbol: &str) -> TradeGate {
        self.base().should_trade_at(symbol, Local::now().naive_local())
    }

    /// Computes (and caches) the current market condition for `symbol`.
    async fn market_condition(&mut self, symbol: &str) -> Result<MarketCondition, StrategyError> {
        Ok(self.base().cached_condition(symbol))
    }

    /// Reads market data and returns a sized signal when conditions line up.
    async fn analyze(&mut self, symbol: &str) -> Result<Option<TradeSignal>, StrategyError>;

    async fn execute(&mut self, signal: &TradeSignal) -> Result<(), StrategyError>;

    /// Called once per pass after all symbols were processed.
    async fn manage_positions(&mut self) -> Result<(), StrategyError>;

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Strategies that run their own background work return `true` here; the
    /// manager then calls `start` instead of spawning its generic loop.
    fn manages_own_loop(&self) -> bool {
        false
    }

    async fn start(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Common settings merged with the variant's typed parameters, as JSON.
    fn settings(&self) -> Result<Value, StrategyError>;

    /// Partial overlay of `settings()`-shaped JSON. Nothing changes on error.
    fn apply_settings(&mut self, settings: &Value) -> Result<(), StrategyError>;
}
