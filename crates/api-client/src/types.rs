use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Account balance and the loss-limit figures the trading gate checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub balance: Decimal,
    /// Realised P&L since the start of the trading day.
    pub daily_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub maximum_loss_limit: Decimal,
    /// Highest end-of-day balance; the trailing MLL threshold hangs off it.
    pub highest_eod_balance: Decimal,
}

impl AccountSummary {
    /// Share of the daily loss limit already used (0 when the day is green).
    pub fn dll_usage(&self) -> Decimal {
        if self.daily_pnl >= Decimal::ZERO || self.daily_loss_limit.is_zero() {
            return Decimal::ZERO;
        }
        self.daily_pnl.abs() / self.daily_loss_limit
    }

    /// Balance below which the account is liquidated.
    pub fn mll_threshold(&self) -> Decimal {
        self.highest_eod_balance - self.maximum_loss_limit
    }
}

/// Broker acknowledgement for a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub fill_price: Option<Decimal>,
    /// Ids of the protective legs, when the order was a bracket.
    pub stop_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}
