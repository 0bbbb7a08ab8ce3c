use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// A coarse classification of a symbol's recent behaviour.
///
/// Computed by strategies and consumed only by the auto-selection scorer and the
/// trading gate. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    #[serde(alias = "trending")]
    TrendingUp,
    TrendingDown,
    Ranging,
    #[serde(alias = "volatile")]
    HighVolatility,
    LowVolatility,
    Breakout,
    Reversal,
    #[default]
    Unknown,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::TrendingUp => "trending_up",
            MarketCondition::TrendingDown => "trending_down",
            MarketCondition::Ranging => "ranging",
            MarketCondition::HighVolatility => "high_volatility",
            MarketCondition::LowVolatility => "low_volatility",
            MarketCondition::Breakout => "breakout",
            MarketCondition::Reversal => "reversal",
            MarketCondition::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketCondition {
    type Err = CoreError;

    /// Accepts the snake_case tags plus the two family names `trending` and
    /// `volatile` used in hand-written configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trending_up" | "trending" => Ok(MarketCondition::TrendingUp),
            "trending_down" => Ok(MarketCondition::TrendingDown),
            "ranging" => Ok(MarketCondition::Ranging),
            "high_volatility" | "volatile" => Ok(MarketCondition::HighVolatility),
            "low_volatility" => Ok(MarketCondition::LowVolatility),
            "breakout" => Ok(MarketCondition::Breakout),
            "reversal" => Ok(MarketCondition::Reversal),
            "unknown" => Ok(MarketCondition::Unknown),
            other => Err(CoreError::InvalidInput(
                "market condition".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Lifecycle state of a single strategy instance.
///
/// `IDLE -> ACTIVE -> IDLE`, with `ERROR` reached when a run loop dies. A strategy
/// in `ERROR` may be started again exactly like an idle one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    #[default]
    Idle,
    Active,
    Error,
}

impl StrategyStatus {
    /// Compact encoding used to share the status through an atomic.
    pub fn as_u8(self) -> u8 {
        match self {
            StrategyStatus::Idle => 0,
            StrategyStatus::Active => 1,
            StrategyStatus::Error => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StrategyStatus::Active,
            2 => StrategyStatus::Error,
            _ => StrategyStatus::Idle,
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyStatus::Idle => "idle",
            StrategyStatus::Active => "active",
            StrategyStatus::Error => "error",
        };
        f.write_str(s)
    }
}
