//! Read-side views over the manager's strategies.

use chrono::{DateTime, Utc};
use core_types::{StrategyMetrics, StrategyStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Snapshot of one strategy, loaded or not.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySummary {
    pub name: String,
    pub status: StrategyStatus,
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub position_size: u32,
    pub max_positions: u32,
    pub open_positions: usize,
    pub metrics: StrategyMetrics,
    /// Empty object when the strategy is not loaded or cannot render settings.
    pub settings: Value,
    pub last_started: Option<DateTime<Utc>>,
    pub last_stopped: Option<DateTime<Utc>>,
}

/// Totals across every strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_strategies: usize,
    pub active_strategies: usize,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
}

impl AggregatedMetrics {
    pub fn from_summaries(summaries: &[StrategySummary]) -> Self {
        let mut totals = Self {
            total_strategies: summaries.len(),
            ..Self::default()
        };
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;

        for summary in summaries {
            if summary.status == StrategyStatus::Active {
                totals.active_strategies += 1;
            }
            let m = &summary.metrics;
            totals.total_trades += m.total_trades;
            totals.winning_trades += m.winning_trades;
            totals.losing_trades += m.losing_trades;
            totals.total_pnl += m.total_pnl;
            gross_profit += m.gross_profit;
            gross_loss += m.gross_loss;
        }

        if totals.total_trades > 0 {
            totals.win_rate =
                Decimal::from(totals.winning_trades) / Decimal::from(totals.total_trades);
        }
        if !gross_loss.is_zero() {
            totals.profit_factor = (gross_profit / gross_loss).abs();
        }
        totals
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub registered: Vec<String>,
    pub loaded: Vec<String>,
    pub active: Vec<String>,
    pub max_concurrent_strategies: usize,
    pub auto_select_enabled: bool,
    pub auto_select_running: bool,
}
