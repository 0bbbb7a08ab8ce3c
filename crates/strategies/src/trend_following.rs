use crate::base::{merge_into, overlay, StrategyBase};
use crate::error::StrategyError;
use crate::indicators;
use crate::Strategy;
use api_client::BrokerClient;
use async_trait::async_trait;
use chrono::{Local, Utc};
use configuration::{StrategyConfig, TrendFollowingParams};
use core_types::{Bar, MarketCondition, OrderSide, Timeframe, TradeSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Indicator readings for one symbol at the latest bar.
#[derive(Debug, Clone, Copy)]
struct Reading {
    price: Decimal,
    fast: Decimal,
    slow: Decimal,
    atr: Decimal,
    strength: Decimal,
}

/// Moving-average trend following with ATR stops.
///
/// Goes long when the fast MA is above the slow MA, price is above the fast MA
/// and the MA separation is strong enough; short is the mirror image. Open
/// positions get their stop trailed by a multiple of ATR.
pub struct TrendFollowing {
    base: StrategyBase,
    params: TrendFollowingParams,
    timeframe: Timeframe,
}

impl TrendFollowing {
    pub const NAME: &'static str = "trend_following";

    pub fn new(
        config: StrategyConfig,
        params: TrendFollowingParams,
        broker: Arc<dyn BrokerClient>,
    ) -> Result<Self, StrategyError> {
        validate(&params)?;
        Ok(Self {
            timeframe: Timeframe::parse(&params.timeframe),
            base: StrategyBase::new(config, broker),
            params,
        })
    }

    pub fn params(&self) -> &TrendFollowingParams {
        &self.params
    }

    async fn bars(&self, symbol: &str) -> Result<Vec<Bar>, StrategyError> {
        Ok(self
            .base
            .broker()
            .get_historical_data(symbol, &self.timeframe, self.params.history_bars)
            .await?)
    }

    fn read(&self, bars: &[Bar]) -> Result<Option<Reading>, StrategyError> {
        let p = &self.params;
        let (Some(fast), Some(slow), Some(atr), Some(last)) = (
            indicators::moving_average(bars, p.fast_period, p.ma_type)?,
            indicators::moving_average(bars, p.slow_period, p.ma_type)?,
            indicators::atr(bars, p.atr_period)?,
            bars.last(),
        ) else {
            return Ok(None);
        };
        Ok(Some(Reading {
            price: last.close,
            fast,
            slow,
            atr,
            strength: indicators::trend_strength(fast, slow),
        }))
    }

    fn classify(&self, reading: &Reading) -> MarketCondition {
        if reading.strength < self.params.min_trend_strength {
            MarketCondition::Ranging
        } else if reading.fast > reading.slow {
            MarketCondition::TrendingUp
        } else {
            MarketCondition::TrendingDown
        }
    }
}

fn validate(params: &TrendFollowingParams) -> Result<(), StrategyError> {
    if params.fast_period == 0 || params.fast_period >= params.slow_period {
        return Err(StrategyError::InvalidParameters(
            "Fast MA period must be positive and less than Slow MA period".to_string(),
        ));
    }
    if params.atr_period == 0 {
        return Err(StrategyError::InvalidParameters(
            "ATR period cannot be zero".to_string(),
        ));
    }
    if params.history_bars <= params.slow_period {
        return Err(StrategyError::InvalidParameters(format!(
            "history_bars ({}) must exceed slow_period ({})",
            params.history_bars, params.slow_period
        )));
    }
    Ok(())
}

#[async_trait]
impl Strategy for TrendFollowing {
    fn name(&self) -> &str {
        &self.base.config.name
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StrategyBase {
        &mut self.base
    }

    async fn market_condition(&mut self, symbol: &str) -> Result<MarketCondition, StrategyError> {
        let bars = self.bars(symbol).await?;
        let condition = match self.read(&bars)? {
            Some(reading) => self.classify(&reading),
            None => MarketCondition::Unknown,
        };
        self.base.remember_condition(symbol, condition);
        Ok(condition)
    }

    async fn analyze(&mut self, symbol: &str) -> Result<Option<TradeSignal>, StrategyError> {
        let bars = self.bars(symbol).await?;
        let Some(reading) = self.read(&bars)? else {
            tracing::debug!(
                strategy = %self.name(),
                symbol = %symbol,
                bars = bars.len(),
                "Not enough history for trend analysis"
            );
            return Ok(None);
        };
        let condition = self.classify(&reading);
        self.base.remember_condition(symbol, condition);

        if self.base.active_positions.contains_key(symbol) {
            return Ok(None);
        }

        let Reading { price, fast, slow, atr, strength } = reading;
        let strong = strength >= self.params.min_trend_strength;
        let side = if fast > slow && price > fast && strong {
            OrderSide::Buy
        } else if fast < slow && price < fast && strong {
            OrderSide::Sell
        } else {
            return Ok(None);
        };

        let stop_distance = atr * self.params.stop_atr_multiplier;
        let target_distance = atr * self.params.target_atr_multiplier;
        let (stop_loss, take_profit) = match side {
            OrderSide::Buy => (price - stop_distance, price + target_distance),
            OrderSide::Sell => (price + stop_distance, price - target_distance),
        };

        Ok(Some(TradeSignal {
            signal_id: Uuid::new_v4(),
            strategy: self.name().to_string(),
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            stop_loss,
            take_profit,
            quantity: self.base.calculate_position_size(symbol, price, stop_loss),
            confidence: (strength + dec!(0.3)).min(Decimal::ONE),
            reason: format!("fast {fast:.2} / slow {slow:.2}, strength {strength:.2}"),
            timestamp: Utc::now(),
        }))
    }

    async fn execute(&mut self, signal: &TradeSignal) -> Result<(), StrategyError> {
        self.base
            .place_bracket(signal, Local::now().date_naive())
            .await?;
        Ok(())
    }

    async fn manage_positions(&mut self) -> Result<(), StrategyError> {
        self.base.refresh_account().await;
        if self.base.active_positions.is_empty() {
            return Ok(());
        }

        let positions = self.base.broker().get_positions().await?;
        self.base.reconcile_positions(&positions);

        let symbols: Vec<String> = self.base.active_positions.keys().cloned().collect();
        for symbol in symbols {
            let bars = self.bars(&symbol).await?;
            let Some(atr) = indicators::atr(&bars, self.params.atr_period)? else {
                continue;
            };
            self.base
                .trail_stop(&symbol, atr * self.params.trailing_atr_multiplier)
                .await?;
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.base.clear_conditions();
        tracing::info!(
            strategy = %self.name(),
            open_positions = self.base.active_positions.len(),
            "Trend following cleaned up"
        );
        Ok(())
    }

    fn settings(&self) -> Result<Value, StrategyError> {
        let mut map = Map::new();
        merge_into(&mut map, &self.base.common_settings())?;
        merge_into(&mut map, &self.params)?;
        Ok(Value::Object(map))
    }

    fn apply_settings(&mut self, settings: &Value) -> Result<(), StrategyError> {
        let params = overlay(&self.params, settings)?;
        validate(&params)?;
        self.base.apply_common_settings(settings)?;
        self.timeframe = Timeframe::parse(&params.timeframe);
        self.params = params;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars::from_closes;
    use api_client::PaperBroker;
    use configuration::PaperConfig;
    use serde_json::json;

    fn strategy(broker: Arc<PaperBroker>) -> TrendFollowing {
        let config = StrategyConfig {
            enabled: true,
            ..StrategyConfig::named(TrendFollowing::NAME)
        };
        TrendFollowing::new(config, TrendFollowingParams::default(), broker).unwrap()
    }

    fn feed(broker: &PaperBroker, closes: &[Decimal]) {
        for bar in from_closes("MNQ", "15m", closes) {
            broker.record_bar(bar);
        }
    }

    fn rising(n: usize) -> Vec<Decimal> {
        (0..n).map(|i| Decimal::from(100 + i as i64)).collect()
    }

    #[test]
    fn rejects_inverted_periods() {
        let params = TrendFollowingParams {
            fast_period: 30,
            slow_period: 10,
            ..Default::default()
        };
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        assert!(TrendFollowing::new(StrategyConfig::named("t"), params, broker).is_err());
    }

    #[tokio::test]
    async fn short_history_gives_no_signal() {
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        feed(&broker, &rising(10));
        let mut s = strategy(broker);
        assert!(s.analyze("MNQ").await.unwrap().is_none());
        assert_eq!(s.market_condition("MNQ").await.unwrap(), MarketCondition::Unknown);
    }

    #[tokio::test]
    async fn steady_uptrend_goes_long_with_atr_bracket() {
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        feed(&broker, &rising(80));
        let mut s = strategy(broker);

        let signal = s.analyze("MNQ").await.unwrap().expect("signal");
        assert_eq!(signal.side, OrderSide::Buy);
        assert_eq!(signal.entry_price, dec!(179));
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.take_profit > signal.entry_price);
        assert_eq!(signal.quantity, dec!(1));
        assert_eq!(signal.confidence, dec!(1));
        assert_eq!(s.base().cached_condition("MNQ"), MarketCondition::TrendingUp);
    }

    #[tokio::test]
    async fn executes_then_trails_the_stop() {
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        feed(&broker, &rising(80));
        let mut s = strategy(Arc::clone(&broker));

        let signal = s.analyze("MNQ").await.unwrap().unwrap();
        s.execute(&signal).await.unwrap();
        assert!(s.base().active_positions.contains_key("MNQ"));
        // Already positioned: no second entry.
        assert!(s.analyze("MNQ").await.unwrap().is_none());

        let initial_stop = s.base().active_positions["MNQ"].stop_loss;
        // A jump that stays short of the take-profit leg.
        feed(&broker, &[dec!(185)]);
        s.manage_positions().await.unwrap();
        let trailed = s.base().active_positions["MNQ"].stop_loss;
        assert!(trailed > initial_stop, "{trailed} <= {initial_stop}");
    }

    #[test]
    fn settings_round_trip_through_json() {
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        let mut s = strategy(broker);
        s.apply_settings(&json!({"fast_period": 5, "position_size": 2, "timeframe": "5m"}))
            .unwrap();
        assert_eq!(s.params().fast_period, 5);
        assert_eq!(s.base().config.position_size, 2);

        let settings = s.settings().unwrap();
        assert_eq!(settings["fast_period"], json!(5));
        assert_eq!(settings["position_size"], json!(2));
        assert_eq!(settings["timeframe"], json!("5m"));

        assert!(s.apply_settings(&json!({"fast_period": 50})).is_err());
        assert_eq!(s.params().fast_period, 5);
    }
}
