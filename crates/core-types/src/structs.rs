use crate::enums::{OrderSide, OrderType};
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finished (or snapshotted) OHLCV bar for one symbol and timeframe.
///
/// `timestamp` is the bar-open instant, i.e. the start of its bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub tick_count: u64,
}

/// One price observation pushed in by the tick source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub volume: Decimal,
    /// Missing timestamps are stamped with the receive time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A trade idea produced by `Strategy::analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub signal_id: Uuid,
    pub strategy: String,
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Number of contracts, already sized by the strategy.
    pub quantity: Decimal,
    /// 0.0 ..= 1.0
    pub confidence: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// An order handed to the broker collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit or stop trigger price. `None` for market orders.
    pub price: Option<Decimal>,
    /// Protective bracket legs attached to the entry.
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Originating strategy, used to tag the order at the broker.
    pub strategy: Option<String>,
}

impl OrderRequest {
    /// Builds a market bracket order from a signal.
    pub fn bracket_from_signal(signal: &TradeSignal) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            order_type: OrderType::Market,
            quantity: signal.quantity,
            price: None,
            stop_loss: Some(signal.stop_loss),
            take_profit: Some(signal.take_profit),
            strategy: Some(signal.strategy.clone()),
        }
    }
}

/// Running performance figures kept by each strategy instance.
///
/// A trade with zero P&L counts as a loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategyMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    /// Fraction of winning trades, 0.0 ..= 1.0.
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    /// `gross_profit / |gross_loss|`, zero until the first loss.
    pub profit_factor: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl StrategyMetrics {
    /// Folds one closed trade into the running figures.
    pub fn record_trade(&mut self, pnl: Decimal, at: DateTime<Utc>) {
        self.total_trades += 1;
        self.total_pnl += pnl;
        self.last_trade_time = Some(at);

        if pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.gross_profit += pnl;
            self.best_trade = self.best_trade.max(pnl);
        } else {
            self.losing_trades += 1;
            self.gross_loss += pnl;
            self.worst_trade = self.worst_trade.min(pnl);
        }

        self.win_rate = Decimal::from(self.winning_trades) / Decimal::from(self.total_trades);
        if self.winning_trades > 0 {
            self.avg_win = self.gross_profit / Decimal::from(self.winning_trades);
        }
        if self.losing_trades > 0 {
            self.avg_loss = self.gross_loss / Decimal::from(self.losing_trades);
        }
        if !self.gross_loss.is_zero() {
            self.profit_factor = (self.gross_profit / self.gross_loss).abs();
        }
    }
}
