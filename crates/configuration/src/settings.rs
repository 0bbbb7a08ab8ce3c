use chrono::{NaiveTime, Timelike};
use core_types::{MarketCondition, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The root configuration structure for the entire application.
///
/// Every section has defaults, so an empty `config.toml` (or none at all) yields
/// a runnable configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub aggregator: AggregatorConfig,
    pub manager: ManagerConfig,
    /// Common per-strategy settings keyed by strategy name.
    pub strategies: HashMap<String, StrategyConfig>,
    /// Typed parameter sets for the built-in strategy variants.
    pub params: StrategyParams,
    pub paper: PaperConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Returns the configured settings for `name`, or the defaults for that name.
    pub fn strategy_config(&self, name: &str) -> StrategyConfig {
        let mut config = self
            .strategies
            .get(name)
            .cloned()
            .unwrap_or_else(|| StrategyConfig::named(name));
        config.name = name.to_string();
        config.symbols = normalize_symbols(&config.symbols);
        config
    }
}

/// Contains parameters for the real-time bar aggregator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Timeframes every symbol gets when it is first seen.
    pub default_timeframes: Vec<String>,
    /// How often partial bars are pushed to the sink.
    pub broadcast_interval_ms: u64,
    /// Builders without a tick in this window are not broadcast.
    pub stale_after_ms: u64,
    /// Number of broadcasts per (symbol, timeframe) logged at info level.
    pub broadcast_log_limit: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_timeframes: ["5s", "15s", "30s", "1m", "2m", "5m", "15m", "30m", "1h"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            broadcast_interval_ms: 200,
            stale_after_ms: 2_000,
            broadcast_log_limit: 5,
        }
    }
}

impl AggregatorConfig {
    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.default_timeframes.iter().map(|s| Timeframe::parse(s)).collect()
    }
}

/// Contains parameters for the strategy manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Account the persisted strategy states belong to.
    pub account_id: String,
    pub max_concurrent_strategies: usize,
    pub auto_select_enabled: bool,
    pub market_condition_check_interval_secs: u64,
    /// Sleep between passes of the generic per-strategy loop.
    pub loop_interval_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            account_id: "default".to_string(),
            max_concurrent_strategies: 3,
            auto_select_enabled: false,
            market_condition_check_interval_secs: 300,
            loop_interval_secs: 60,
        }
    }
}

/// Contains parameters for the in-process paper broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    /// Fraction of the last bar's high-low range applied against market fills.
    pub slippage_pct: Decimal,
    pub daily_loss_limit: Decimal,
    pub maximum_loss_limit: Decimal,
    /// Bars kept per (symbol, timeframe).
    pub history_limit: usize,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(150000),
            slippage_pct: Decimal::ZERO,
            daily_loss_limit: dec!(3000),
            maximum_loss_limit: dec!(4500),
            history_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
    pub file_prefix: Option<String>,
}

/// Local-time trading hours with an inner no-trade window. Both bounds inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(with = "hhmm")]
    pub no_trade_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub no_trade_end: NaiveTime,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(15, 45, 0).unwrap_or_default(),
            no_trade_start: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            no_trade_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        }
    }
}

impl TradingWindow {
    /// Whether trading is allowed at `now` (minute resolution).
    pub fn allows(&self, now: NaiveTime) -> bool {
        let now = now.with_second(0).unwrap_or(now).with_nanosecond(0).unwrap_or(now);
        if now < self.start || now > self.end {
            return false;
        }
        !(self.no_trade_start <= now && now <= self.no_trade_end)
    }
}

/// Declarative configuration shared by every strategy variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub name: String,
    pub enabled: bool,
    /// Ordered, unique, upper-case.
    pub symbols: Vec<String>,
    pub max_positions: u32,
    /// Contract cap per trade.
    pub position_size: u32,
    /// Percent of account balance risked per trade (0.5 = 0.5%).
    pub risk_per_trade_pct: Decimal,
    pub max_daily_trades: u32,
    pub preferred_conditions: Vec<MarketCondition>,
    pub avoid_conditions: Vec<MarketCondition>,
    pub trading_window: TradingWindow,
    pub respect_dll: bool,
    pub respect_mll: bool,
    /// Fraction of the daily loss limit that may be used before trading stops.
    pub max_dll_usage_pct: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: false,
            symbols: vec!["MNQ".to_string()],
            max_positions: 2,
            position_size: 1,
            risk_per_trade_pct: dec!(0.5),
            max_daily_trades: 10,
            preferred_conditions: vec![
                MarketCondition::Breakout,
                MarketCondition::TrendingUp,
                MarketCondition::TrendingDown,
            ],
            avoid_conditions: vec![MarketCondition::HighVolatility],
            trading_window: TradingWindow::default(),
            respect_dll: true,
            respect_mll: true,
            max_dll_usage_pct: dec!(0.75),
        }
    }
}

impl StrategyConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Replaces the symbol list, normalising it.
    pub fn set_symbols(&mut self, symbols: &[String]) {
        self.symbols = normalize_symbols(symbols);
    }
}

/// Upper-cases and trims symbols, dropping blanks and later duplicates.
pub fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

/// Contains the parameter sets for all built-in strategies.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StrategyParams {
    pub trend_following: TrendFollowingParams,
    pub mean_reversion: MeanReversionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaType {
    Sma,
    #[default]
    Ema,
}

/// Parameters for the moving-average trend following strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendFollowingParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub ma_type: MaType,
    pub atr_period: usize,
    pub stop_atr_multiplier: Decimal,
    pub trailing_atr_multiplier: Decimal,
    pub target_atr_multiplier: Decimal,
    /// MA separation strength (0..1, 5% separation = 1.0) required to enter.
    pub min_trend_strength: Decimal,
    pub timeframe: String,
    /// Bars requested from the market-data collaborator per evaluation.
    pub history_bars: usize,
}

impl Default for TrendFollowingParams {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            ma_type: MaType::Ema,
            atr_period: 14,
            stop_atr_multiplier: dec!(2.0),
            trailing_atr_multiplier: dec!(3.0),
            target_atr_multiplier: dec!(5.0),
            min_trend_strength: dec!(0.5),
            timeframe: "15m".to_string(),
            history_bars: 100,
        }
    }
}

/// Parameters for the RSI / moving-average mean reversion strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionParams {
    pub rsi_period: usize,
    pub rsi_overbought: Decimal,
    pub rsi_oversold: Decimal,
    pub ma_period: usize,
    pub ma_type: MaType,
    pub atr_period: usize,
    /// Distance from the MA, in ATRs, that counts as stretched.
    pub atr_deviation: Decimal,
    pub stop_atr_multiplier: Decimal,
    /// Target the MA itself; otherwise entry +/- 2 ATR.
    pub target_ma_return: bool,
    /// ATR as a percent of price above which the market counts as highly volatile.
    pub high_volatility_atr_pct: Decimal,
    pub timeframe: String,
    pub history_bars: usize,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: dec!(70),
            rsi_oversold: dec!(30),
            ma_period: 20,
            ma_type: MaType::Sma,
            atr_period: 14,
            atr_deviation: dec!(2.0),
            stop_atr_multiplier: dec!(1.5),
            target_ma_return: true,
            high_volatility_atr_pct: dec!(1.0),
            timeframe: "5m".to_string(),
            history_bars: 100,
        }
    }
}

/// `"HH:MM"` (seconds optional on input) for trading window bounds.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
