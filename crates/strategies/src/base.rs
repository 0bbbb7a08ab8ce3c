use crate::error::StrategyError;
use api_client::{AccountSummary, BrokerClient, BrokerPosition, OrderAck};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use configuration::StrategyConfig;
use core_types::{
    point_value, MarketCondition, OrderRequest, OrderSide, StrategyMetrics, TradeSignal,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Balance assumed for sizing before the first account summary arrives.
const DEFAULT_ACCOUNT_BALANCE: Decimal = dec!(150000);
/// Hard ceiling on contracts per trade regardless of configuration.
const MAX_CONTRACTS: u32 = 10;
/// Share of the maximum loss limit kept as headroom above the liquidation threshold.
const MLL_BUFFER: Decimal = dec!(0.10);

/// Outcome of the cheap pre-trade check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeGate {
    Allowed,
    Blocked(String),
}

impl TradeGate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, TradeGate::Allowed)
    }

    pub fn reason(&self) -> &str {
        match self {
            TradeGate::Allowed => "All checks passed",
            TradeGate::Blocked(reason) => reason,
        }
    }
}

/// A position this strategy opened and is still responsible for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedPosition {
    pub order_id: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub quantity: Decimal,
    pub stop_order_id: Option<String>,
    /// Most recent mark seen from the broker.
    pub last_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl TrackedPosition {
    fn pnl_at(&self, symbol: &str, price: Decimal) -> Decimal {
        let direction = match self.side {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        };
        (price - self.entry_price) * self.quantity * point_value(symbol) * direction
    }

    /// Best guess at the exit fill once the broker stops reporting the position:
    /// whichever bracket leg the last mark was closer to.
    fn estimated_exit(&self) -> Decimal {
        let to_stop = (self.last_price - self.stop_loss).abs();
        let to_target = (self.last_price - self.take_profit).abs();
        if to_stop <= to_target {
            self.stop_loss
        } else {
            self.take_profit
        }
    }
}

/// The settings every variant shares, as persisted alongside its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSettings {
    pub position_size: u32,
    pub max_positions: u32,
    pub max_daily_trades: u32,
    pub risk_per_trade_pct: Decimal,
}

/// Overlays the keys of `patch` that `current` knows about and re-validates the
/// result by deserialising it back into `T`. Unknown keys are ignored.
pub fn overlay<T>(current: &T, patch: &Value) -> Result<T, StrategyError>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = match serde_json::to_value(current)? {
        Value::Object(map) => map,
        other => {
            return Err(StrategyError::InvalidParameters(format!(
                "settings must serialize to an object, got {other}"
            )));
        }
    };
    if let Value::Object(patch) = patch {
        for (key, value) in patch {
            if let Some(slot) = merged.get_mut(key) {
                *slot = value.clone();
            }
        }
    } else if !patch.is_null() {
        return Err(StrategyError::InvalidParameters(
            "settings must be a JSON object".to_string(),
        ));
    }
    Ok(serde_json::from_value(Value::Object(merged))?)
}

/// Serialises `value` and merges its fields into `target`.
pub fn merge_into<T: Serialize>(target: &mut Map<String, Value>, value: &T) -> Result<(), StrategyError> {
    if let Value::Object(fields) = serde_json::to_value(value)? {
        target.extend(fields);
    }
    Ok(())
}

/// State and behaviour shared by every strategy variant: its config, running
/// metrics, the positions it opened, its market-condition cache and the last
/// account snapshot it saw.
pub struct StrategyBase {
    pub config: StrategyConfig,
    pub metrics: StrategyMetrics,
    pub active_positions: HashMap<String, TrackedPosition>,
    daily_trades: u32,
    trades_day: Option<NaiveDate>,
    conditions: HashMap<String, MarketCondition>,
    account: Option<AccountSummary>,
    broker: Arc<dyn BrokerClient>,
}

impl StrategyBase {
    pub fn new(config: StrategyConfig, broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            config,
            metrics: StrategyMetrics::default(),
            active_positions: HashMap::new(),
            daily_trades: 0,
            trades_day: None,
            conditions: HashMap::new(),
            account: None,
            broker,
        }
    }

    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }

    /// Trades placed on `today`; the counter resets when the day changes.
    pub fn trades_on(&self, today: NaiveDate) -> u32 {
        if self.trades_day == Some(today) { self.daily_trades } else { 0 }
    }

    pub fn cached_condition(&self, symbol: &str) -> MarketCondition {
        self.conditions.get(symbol).copied().unwrap_or_default()
    }

    pub fn remember_condition(&mut self, symbol: &str, condition: MarketCondition) {
        self.conditions.insert(symbol.to_string(), condition);
    }

    pub fn clear_conditions(&mut self) {
        self.conditions.clear();
    }

    pub fn account(&self) -> Option<&AccountSummary> {
        self.account.as_ref()
    }

    pub fn set_account(&mut self, summary: AccountSummary) {
        self.account = Some(summary);
    }

    /// Pulls a fresh account summary. Failures keep the previous snapshot.
    pub async fn refresh_account(&mut self) {
        match self.broker.get_account_summary().await {
            Ok(summary) => self.account = Some(summary),
            Err(e) => tracing::warn!(
                strategy = %self.config.name,
                error = %e,
                "Could not refresh account summary"
            ),
        }
    }

    /// Runs the pre-trade filters in order and reports the first one that fails.
    pub fn should_trade_at(&self, symbol: &str, now: NaiveDateTime) -> TradeGate {
        let config = &self.config;
        if !config.enabled {
            return TradeGate::Blocked("Strategy disabled".to_string());
        }

        let trades = self.trades_on(now.date());
        if trades >= config.max_daily_trades {
            return TradeGate::Blocked(format!(
                "Daily trade limit reached ({}/{})",
                trades, config.max_daily_trades
            ));
        }

        if self.active_positions.len() as u32 >= config.max_positions {
            return TradeGate::Blocked(format!(
                "Max positions reached ({}/{})",
                self.active_positions.len(),
                config.max_positions
            ));
        }

        if !config.trading_window.allows(now.time()) {
            return TradeGate::Blocked("Outside trading hours".to_string());
        }

        let condition = self.cached_condition(symbol);
        if config.avoid_conditions.contains(&condition) {
            return TradeGate::Blocked(format!("Avoiding market condition: {condition}"));
        }

        // Without an account snapshot the loss-limit checks have nothing to say.
        if let Some(account) = &self.account {
            if config.respect_dll {
                let usage = account.dll_usage();
                if usage >= config.max_dll_usage_pct {
                    return TradeGate::Blocked(format!(
                        "DLL usage {:.1}% >= {:.1}% limit",
                        usage * dec!(100),
                        config.max_dll_usage_pct * dec!(100)
                    ));
                }
            }
            if config.respect_mll {
                let threshold = account.mll_threshold();
                if account.balance < threshold + account.maximum_loss_limit * MLL_BUFFER {
                    return TradeGate::Blocked(format!(
                        "Too close to MLL threshold (${:.2} vs ${:.2})",
                        account.balance, threshold
                    ));
                }
            }
        }

        TradeGate::Allowed
    }

    /// Contracts to trade so that hitting `stop` loses about `risk_per_trade_pct`
    /// of the balance, clamped to `[1, min(position_size, 10)]`.
    pub fn calculate_position_size(&self, symbol: &str, entry: Decimal, stop: Decimal) -> Decimal {
        let balance = self
            .account
            .as_ref()
            .map(|a| a.balance)
            .unwrap_or(DEFAULT_ACCOUNT_BALANCE);
        let risk_dollars = balance * self.config.risk_per_trade_pct / dec!(100);
        let distance = (entry - stop).abs();
        let per_contract = distance * point_value(symbol);

        let contracts = if per_contract > Decimal::ZERO {
            (risk_dollars / per_contract).floor()
        } else {
            Decimal::from(self.config.position_size)
        };

        let cap = Decimal::from(self.config.position_size.min(MAX_CONTRACTS));
        contracts.min(cap).max(Decimal::ONE)
    }

    /// Sends `signal` as a bracket order and starts tracking the position.
    pub async fn place_bracket(
        &mut self,
        signal: &TradeSignal,
        today: NaiveDate,
    ) -> Result<OrderAck, StrategyError> {
        let order = OrderRequest::bracket_from_signal(signal);
        let ack = self.broker.place_order(&order).await?;

        if self.trades_day != Some(today) {
            self.trades_day = Some(today);
            self.daily_trades = 0;
        }
        self.daily_trades += 1;

        let entry = ack.fill_price.unwrap_or(signal.entry_price);
        self.active_positions.insert(
            signal.symbol.clone(),
            TrackedPosition {
                order_id: ack.order_id.clone(),
                side: signal.side,
                entry_price: entry,
                stop_loss: signal.stop_loss,
                take_profit: signal.take_profit,
                quantity: signal.quantity,
                stop_order_id: ack.stop_order_id.clone(),
                last_price: entry,
                opened_at: signal.timestamp,
            },
        );

        tracing::info!(
            strategy = %self.config.name,
            symbol = %signal.symbol,
            side = ?signal.side,
            quantity = %signal.quantity,
            order_id = %ack.order_id,
            "Order placed"
        );
        Ok(ack)
    }

    /// Updates marks from the broker and drops positions it no longer reports,
    /// recording their estimated P&L. Returns the closed symbols.
    pub fn reconcile_positions(&mut self, broker_positions: &[BrokerPosition]) -> Vec<String> {
        let mut closed = Vec::new();
        for (symbol, position) in self.active_positions.iter_mut() {
            match broker_positions.iter().find(|p| &p.symbol == symbol) {
                Some(live) => position.last_price = live.current_price,
                None => closed.push(symbol.clone()),
            }
        }

        for symbol in &closed {
            if let Some(position) = self.active_positions.remove(symbol) {
                let pnl = position.pnl_at(symbol, position.estimated_exit());
                self.metrics.record_trade(pnl, Utc::now());
                tracing::info!(
                    strategy = %self.config.name,
                    symbol = %symbol,
                    pnl = %pnl,
                    total_trades = self.metrics.total_trades,
                    "Position closed"
                );
            }
        }
        closed
    }

    /// Moves the stop of `symbol` to `distance` behind the last mark when that is
    /// an improvement. Returns whether the stop moved.
    pub async fn trail_stop(&mut self, symbol: &str, distance: Decimal) -> Result<bool, StrategyError> {
        let broker = Arc::clone(&self.broker);
        let name = self.config.name.clone();
        let Some(position) = self.active_positions.get_mut(symbol) else {
            return Ok(false);
        };

        let (candidate, improves) = match position.side {
            OrderSide::Buy => {
                let stop = position.last_price - distance;
                (stop, stop > position.stop_loss)
            }
            OrderSide::Sell => {
                let stop = position.last_price + distance;
                (stop, stop < position.stop_loss)
            }
        };
        if !improves {
            return Ok(false);
        }

        if let Some(order_id) = &position.stop_order_id {
            broker.modify_order(order_id, candidate).await?;
        }
        tracing::info!(
            strategy = %name,
            symbol = %symbol,
            from = %position.stop_loss,
            to = %candidate,
            "Trailing stop updated"
        );
        position.stop_loss = candidate;
        Ok(true)
    }

    pub fn common_settings(&self) -> CommonSettings {
        CommonSettings {
            position_size: self.config.position_size,
            max_positions: self.config.max_positions,
            max_daily_trades: self.config.max_daily_trades,
            risk_per_trade_pct: self.config.risk_per_trade_pct,
        }
    }

    pub fn apply_common_settings(&mut self, patch: &Value) -> Result<(), StrategyError> {
        let common = overlay(&self.common_settings(), patch)?;
        if common.position_size == 0 {
            return Err(StrategyError::InvalidParameters(
                "position_size must be at least 1".to_string(),
            ));
        }
        self.config.position_size = common.position_size;
        self.config.max_positions = common.max_positions;
        self.config.max_daily_trades = common.max_daily_trades;
        self.config.risk_per_trade_pct = common.risk_per_trade_pct;
        Ok(())
    }
}
