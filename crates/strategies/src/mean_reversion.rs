use crate::base::{merge_into, overlay, StrategyBase};
use crate::error::StrategyError;
use crate::indicators;
use crate::Strategy;
use api_client::BrokerClient;
use async_trait::async_trait;
use chrono::{Local, Utc};
use configuration::{MeanReversionParams, StrategyConfig};
use core_types::{Bar, MarketCondition, OrderSide, Timeframe, TradeSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// RSI extremes stretched away from a moving average, faded back toward it.
pub struct MeanReversion {
    base: StrategyBase,
    params: MeanReversionParams,
    timeframe: Timeframe,
}

impl MeanReversion {
    pub const NAME: &'static str = "mean_reversion";

    pub fn new(
        config: StrategyConfig,
        params: MeanReversionParams,
        broker: Arc<dyn BrokerClient>,
    ) -> Result<Self, StrategyError> {
        validate(&params)?;
        Ok(Self {
            timeframe: Timeframe::parse(&params.timeframe),
            base: StrategyBase::new(config, broker),
            params,
        })
    }

    pub fn params(&self) -> &MeanReversionParams {
        &self.params
    }

    async fn bars(&self, symbol: &str) -> Result<Vec<Bar>, StrategyError> {
        Ok(self
            .base
            .broker()
            .get_historical_data(symbol, &self.timeframe, self.params.history_bars)
            .await?)
    }

    fn volatility_condition(&self, price: Decimal, atr: Decimal) -> MarketCondition {
        if price.is_zero() {
            return MarketCondition::Unknown;
        }
        if atr / price * dec!(100) > self.params.high_volatility_atr_pct {
            MarketCondition::HighVolatility
        } else {
            MarketCondition::Ranging
        }
    }
}

fn validate(params: &MeanReversionParams) -> Result<(), StrategyError> {
    if params.rsi_period == 0 || params.ma_period == 0 || params.atr_period == 0 {
        return Err(StrategyError::InvalidParameters(
            "RSI, MA and ATR periods must be positive".to_string(),
        ));
    }
    if !(Decimal::ZERO < params.rsi_oversold
        && params.rsi_oversold < params.rsi_overbought
        && params.rsi_overbought < dec!(100))
    {
        return Err(StrategyError::InvalidParameters(format!(
            "RSI thresholds must satisfy 0 < oversold ({}) < overbought ({}) < 100",
            params.rsi_oversold, params.rsi_overbought
        )));
    }
    Ok(())
}

#[async_trait]
impl Strategy for MeanReversion {
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
        let condition = match (indicators::atr(&bars, self.params.atr_period)?, bars.last()) {
            (Some(atr), Some(last)) => self.volatility_condition(last.close, atr),
            _ => MarketCondition::Unknown,
        };
        self.base.remember_condition(symbol, condition);
        Ok(condition)
    }

    async fn analyze(&mut self, symbol: &str) -> Result<Option<TradeSignal>, StrategyError> {
        let p = &self.params;
        let bars = self.bars(symbol).await?;
        let (Some(rsi), Some(ma), Some(atr), Some(last)) = (
            indicators::rsi(&bars, p.rsi_period)?,
            indicators::moving_average(&bars, p.ma_period, p.ma_type)?,
            indicators::atr(&bars, p.atr_period)?,
            bars.last(),
        ) else {
            tracing::debug!(strategy = %self.name(), symbol = %symbol, "Not enough history");
            return Ok(None);
        };
        let price = last.close;
        let condition = self.volatility_condition(price, atr);
        self.base.remember_condition(symbol, condition);

        if self.base.active_positions.contains_key(symbol) {
            return Ok(None);
        }

        let band = atr * p.atr_deviation;
        let (side, confidence) = if rsi < p.rsi_oversold && price < ma - band {
            (OrderSide::Buy, (p.rsi_oversold - rsi) / p.rsi_oversold + dec!(0.5))
        } else if rsi > p.rsi_overbought && price > ma + band {
            (
                OrderSide::Sell,
                (rsi - p.rsi_overbought) / (dec!(100) - p.rsi_overbought) + dec!(0.5),
            )
        } else {
            return Ok(None);
        };

        let stop_distance = atr * p.stop_atr_multiplier;
        let fallback_target = atr * dec!(2);
        let (stop_loss, take_profit) = match side {
            OrderSide::Buy => (
                price - stop_distance,
                if p.target_ma_return { ma } else { price + fallback_target },
            ),
            OrderSide::Sell => (
                price + stop_distance,
                if p.target_ma_return { ma } else { price - fallback_target },
            ),
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
            confidence: confidence.min(Decimal::ONE),
            reason: format!("RSI {rsi:.1}, price {price} vs MA {ma:.2} +/- {band:.2}"),
            timestamp: Utc::now(),
        }))
    }

    async fn execute(&mut self, signal: &TradeSignal) -> Result<(), StrategyError> {
        self.base
            .place_bracket(signal, Local::now().date_naive())
            .await?;
        Ok(())
    }

    /// Exits are left to the bracket legs; this only notices closed positions.
    async fn manage_positions(&mut self) -> Result<(), StrategyError> {
        self.base.refresh_account().await;
        if self.base.active_positions.is_empty() {
            return Ok(());
        }
        let positions = self.base.broker().get_positions().await?;
        self.base.reconcile_positions(&positions);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.base.clear_conditions();
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

    fn setup(closes: &[Decimal]) -> (Arc<PaperBroker>, MeanReversion) {
        let broker = Arc::new(PaperBroker::new("acct", PaperConfig::default()));
        for bar in from_closes("MES", "5m", closes) {
            broker.record_bar(bar);
        }
        let config = StrategyConfig {
            enabled: true,
            symbols: vec!["MES".to_string()],
            ..StrategyConfig::named(MeanReversion::NAME)
        };
        let strategy =
            MeanReversion::new(config, MeanReversionParams::default(), broker.clone()).unwrap();
        (broker, strategy)
    }

    fn selloff() -> Vec<Decimal> {
        let mut closes = vec![dec!(100); 35];
        closes.extend([dec!(98), dec!(96), dec!(94), dec!(92), dec!(90)]);
        closes
    }

    #[tokio::test]
    async fn flat_market_is_quiet() {
        let (_, mut s) = setup(&[dec!(4000); 40]);
        assert!(s.analyze("MES").await.unwrap().is_none());
        assert_eq!(s.market_condition("MES").await.unwrap(), MarketCondition::Ranging);
    }

    #[tokio::test]
    async fn oversold_selloff_buys_back_to_the_mean() {
        let (_, mut s) = setup(&selloff());
        let signal = s.analyze("MES").await.unwrap().expect("signal");

        assert_eq!(signal.side, OrderSide::Buy);
        assert_eq!(signal.entry_price, dec!(90));
        assert!(signal.stop_loss < dec!(90));
        // SMA(20) of fifteen 100s and the five selloff closes.
        assert!((signal.take_profit - dec!(98.5)).abs() < dec!(0.001));
        assert_eq!(signal.confidence, dec!(1));
        // The selloff bars are wide relative to price.
        assert_eq!(s.base().cached_condition("MES"), MarketCondition::HighVolatility);
    }

    #[tokio::test]
    async fn fixed_target_when_not_returning_to_ma() {
        let (_, mut s) = setup(&selloff());
        s.apply_settings(&json!({"target_ma_return": false})).unwrap();
        let signal = s.analyze("MES").await.unwrap().unwrap();
        assert!(signal.take_profit > dec!(90));
        assert!(signal.take_profit < dec!(98.5));
    }

    #[tokio::test]
    async fn closed_bracket_is_dropped_on_manage() {
        let (broker, mut s) = setup(&selloff());
        let signal = s.analyze("MES").await.unwrap().unwrap();
        s.execute(&signal).await.unwrap();
        assert_eq!(s.base().active_positions.len(), 1);

        // Trade straight through the stop.
        for bar in from_closes("MES", "5m", &[dec!(80)]) {
            broker.record_bar(bar);
        }
        s.manage_positions().await.unwrap();
        assert!(s.base().active_positions.is_empty());
        assert_eq!(s.base().metrics.total_trades, 1);
        assert_eq!(s.base().metrics.losing_trades, 1);
    }

    #[test]
    fn rejects_crossed_rsi_thresholds() {
        let (_, mut s) = setup(&[]);
        let err = s
            .apply_settings(&json!({"rsi_oversold": 80}))
            .unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParameters(_)));
        assert_eq!(s.params().rsi_oversold, dec!(30));
    }
}
