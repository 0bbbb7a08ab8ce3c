use configuration::StrategyConfig;
use core_types::{MarketCondition, StrategyMetrics};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use strategies::Strategy;
use tracing::warn;

/// What the manager's read side knows about a strategy without touching it.
#[derive(Debug, Clone, Default)]
pub struct StrategyView {
    pub config: StrategyConfig,
    pub metrics: StrategyMetrics,
    pub open_positions: usize,
    /// Rendered settings, `{}` when the strategy could not render them.
    pub settings: Value,
    /// Last known condition per configured symbol, in symbol order.
    pub conditions: Vec<MarketCondition>,
}

impl StrategyView {
    pub fn of(strategy: &dyn Strategy) -> Self {
        let settings = strategy.settings().unwrap_or_else(|e| {
            warn!(strategy = %strategy.name(), error = %e, "Could not render settings");
            json!({})
        });
        let config = strategy.config().clone();
        let conditions = config
            .symbols
            .iter()
            .map(|s| strategy.base().cached_condition(s))
            .collect();
        Self {
            metrics: strategy.metrics().clone(),
            open_positions: strategy.base().active_positions.len(),
            settings,
            conditions,
            config,
        }
    }
}

/// Shared snapshot of a strategy, refreshed by whoever holds the instance
/// lock. Readers never wait on a strategy call.
#[derive(Debug, Clone)]
pub struct ViewHandle(Arc<Mutex<StrategyView>>);

impl ViewHandle {
    pub fn new(strategy: &dyn Strategy) -> Self {
        Self(Arc::new(Mutex::new(StrategyView::of(strategy))))
    }

    pub fn get(&self) -> StrategyView {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn refresh(&self, strategy: &dyn Strategy) {
        let view = StrategyView::of(strategy);
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = view;
    }
}
