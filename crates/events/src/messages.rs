use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{Bar, StrategyStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Enum representing the severity of a log message for structured logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured log message to be pushed to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// The OHLCV portion of a bar, as carried in a `market_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPrices {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Snapshot of an in-progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarUpdate {
    pub symbol: String,
    pub timeframe: String,
    /// Bar-open instant.
    pub timestamp: DateTime<Utc>,
    pub bar: BarPrices,
    pub is_partial: bool,
}

impl BarUpdate {
    pub fn partial(bar: &Bar) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe.to_string(),
            timestamp: bar.timestamp,
            bar: BarPrices {
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            },
            is_partial: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatusChange {
    pub strategy: String,
    pub status: StrategyStatus,
    pub message: String,
}

/// The top-level broadcast message enum.
///
/// Every variant serializes to a flat object with a snake_case `type` tag, a
/// `data` payload and the emission `timestamp`, e.g.
/// `{"type":"market_update","data":{"symbol":"MNQ",...,"is_partial":true},"timestamp":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A partial (still forming) bar.
    MarketUpdate {
        data: BarUpdate,
        timestamp: DateTime<Utc>,
    },
    /// A bar that was finalised by a bucket boundary.
    BarClosed { data: Bar, timestamp: DateTime<Utc> },
    /// A strategy changed lifecycle state.
    StrategyStatus {
        data: StrategyStatusChange,
        timestamp: DateTime<Utc>,
    },
    /// A structured log message.
    Log {
        data: LogMessage,
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    pub fn market_update(data: BarUpdate) -> Self {
        WsMessage::MarketUpdate {
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn bar_closed(bar: Bar) -> Self {
        WsMessage::BarClosed {
            data: bar,
            timestamp: Utc::now(),
        }
    }

    pub fn strategy_status(strategy: &str, status: StrategyStatus, message: impl Into<String>) -> Self {
        WsMessage::StrategyStatus {
            data: StrategyStatusChange {
                strategy: strategy.to_string(),
                status,
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        WsMessage::Log {
            data: LogMessage {
                level,
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, EventsError> {
        serde_json::to_string(self).map_err(|e| EventsError::Serialization(e.to_string()))
    }
}
