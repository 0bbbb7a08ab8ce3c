use crate::error::ApiError;
use crate::types::{AccountSummary, BrokerPosition, OrderAck};
use crate::BrokerClient;
use async_trait::async_trait;
use chrono::NaiveDate;
use configuration::PaperConfig;
use core_types::{point_value, Bar, OrderRequest, OrderSide, OrderType, Timeframe};
use events::WsMessage;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Stop,
    TakeProfit,
}

/// A resting protective order. `side` is the side of the exit fill.
#[derive(Debug, Clone)]
struct WorkingOrder {
    symbol: String,
    side: OrderSide,
    leg: Leg,
    price: Decimal,
    quantity: Decimal,
}

impl WorkingOrder {
    fn triggered_by(&self, bar: &Bar) -> bool {
        match (self.leg, self.side) {
            // Exiting a long.
            (Leg::Stop, OrderSide::Sell) => bar.low <= self.price,
            (Leg::TakeProfit, OrderSide::Sell) => bar.high >= self.price,
            // Exiting a short.
            (Leg::Stop, OrderSide::Buy) => bar.high >= self.price,
            (Leg::TakeProfit, OrderSide::Buy) => bar.low <= self.price,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: OrderSide,
    quantity: Decimal,
    entry_price: Decimal,
    current_price: Decimal,
}

impl PaperPosition {
    fn pnl_at(&self, symbol: &str, price: Decimal, quantity: Decimal) -> Decimal {
        let direction = match self.side {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        };
        (price - self.entry_price) * quantity * point_value(symbol) * direction
    }
}

#[derive(Debug)]
struct PaperState {
    history: HashMap<(String, Timeframe), VecDeque<Bar>>,
    last_bar: HashMap<String, Bar>,
    positions: HashMap<String, PaperPosition>,
    working: HashMap<String, WorkingOrder>,
    balance: Decimal,
    daily_pnl: Decimal,
    highest_eod_balance: Decimal,
    trading_day: Option<NaiveDate>,
}

/// The "virtual broker" for paper trading.
///
/// Bars come in through [`PaperBroker::record_bar`] (usually fed from the
/// aggregator's `bar_closed` events). Market orders fill at the latest close,
/// pushed against the trader by `slippage_pct` of that bar's range. Bracket legs
/// rest until a later bar trades through them; if both legs of a position trigger
/// on the same bar the stop wins.
pub struct PaperBroker {
    account_id: String,
    params: PaperConfig,
    state: Mutex<PaperState>,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(account_id: impl Into<String>, params: PaperConfig) -> Self {
        let state = PaperState {
            history: HashMap::new(),
            last_bar: HashMap::new(),
            positions: HashMap::new(),
            working: HashMap::new(),
            balance: params.initial_balance,
            daily_pnl: Decimal::ZERO,
            highest_eod_balance: params.initial_balance,
            trading_day: None,
        };
        Self {
            account_id: account_id.into(),
            params,
            state: Mutex::new(state),
            next_id: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a completed bar to the history and runs it against resting orders.
    pub fn record_bar(&self, bar: Bar) {
        let symbol = bar.symbol.to_uppercase();
        let mut state = self.state();

        let day = bar.timestamp.date_naive();
        match state.trading_day {
            Some(current) if day > current => {
                state.highest_eod_balance = state.highest_eod_balance.max(state.balance);
                state.daily_pnl = Decimal::ZERO;
                state.trading_day = Some(day);
            }
            None => state.trading_day = Some(day),
            _ => {}
        }

        let history = state
            .history
            .entry((symbol.clone(), bar.timeframe.clone()))
            .or_default();
        history.push_back(bar.clone());
        while history.len() > self.params.history_limit.max(1) {
            history.pop_front();
        }

        if let Some(position) = state.positions.get_mut(&symbol) {
            position.current_price = bar.close;
        }
        state.last_bar.insert(symbol.clone(), bar.clone());

        self.trigger_working_orders(&mut state, &symbol, &bar);
    }

    fn trigger_working_orders(&self, state: &mut PaperState, symbol: &str, bar: &Bar) {
        let mut hits: Vec<(String, WorkingOrder)> = state
            .working
            .iter()
            .filter(|(_, order)| order.symbol == symbol && order.triggered_by(bar))
            .map(|(id, order)| (id.clone(), order.clone()))
            .collect();
        if hits.is_empty() {
            return;
        }
        hits.sort_by_key(|(_, order)| if order.leg == Leg::Stop { 0 } else { 1 });
        let (id, order) = hits.remove(0);

        let realized = Self::apply_fill(state, symbol, order.side, order.quantity, order.price);
        // One-cancels-other: once a leg fills, the sibling leg goes too.
        state.working.retain(|_, o| o.symbol != symbol);
        tracing::info!(
            symbol = %symbol,
            order_id = %id,
            leg = ?order.leg,
            price = %order.price,
            pnl = %realized,
            "Paper bracket leg filled"
        );
    }

    /// Applies a fill to the book, returning the realised P&L.
    fn apply_fill(
        state: &mut PaperState,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Decimal {
        let mut realized = Decimal::ZERO;
        let mut remove = false;

        match state.positions.get_mut(symbol) {
            Some(position) if position.side == side => {
                // Adding: average the entry.
                let total = position.quantity + quantity;
                position.entry_price =
                    (position.entry_price * position.quantity + price * quantity) / total;
                position.quantity = total;
                position.current_price = price;
            }
            Some(position) => {
                let closing = quantity.min(position.quantity);
                realized = position.pnl_at(symbol, price, closing);
                position.quantity -= closing;
                position.current_price = price;
                let leftover = quantity - closing;
                if leftover > Decimal::ZERO {
                    // Reversal: the remainder opens the other way.
                    position.side = side;
                    position.quantity = leftover;
                    position.entry_price = price;
                } else if position.quantity.is_zero() {
                    remove = true;
                }
            }
            None => {
                state.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        side,
                        quantity,
                        entry_price: price,
                        current_price: price,
                    },
                );
            }
        }

        if remove {
            state.positions.remove(symbol);
        }
        state.balance += realized;
        state.daily_pnl += realized;
        realized
    }

    /// Execution price for a market order, modelling slippage against the trader
    /// as a share of the last bar's high-low range.
    fn slippage_price(&self, side: OrderSide, bar: &Bar) -> Decimal {
        let range = bar.high - bar.low;
        if range.is_zero() || self.params.slippage_pct.is_zero() {
            return bar.close;
        }
        let slippage = range * self.params.slippage_pct;
        match side {
            OrderSide::Buy => bar.close + slippage,
            OrderSide::Sell => bar.close - slippage,
        }
    }

    /// Consumes `bar_closed` events until the channel closes.
    pub async fn follow(&self, mut rx: broadcast::Receiver<WsMessage>) {
        loop {
            match rx.recv().await {
                Ok(WsMessage::BarClosed { data, .. }) => self.record_bar(data),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Paper broker fell behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError> {
        let key = (symbol.to_uppercase(), timeframe.clone());
        let state = self.state();
        let bars = state
            .history
            .get(&key)
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default();
        Ok(bars)
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, ApiError> {
        let state = self.state();
        let mut positions: Vec<BrokerPosition> = state
            .positions
            .iter()
            .map(|(symbol, p)| BrokerPosition {
                symbol: symbol.clone(),
                side: p.side,
                quantity: p.quantity,
                entry_price: p.entry_price,
                current_price: p.current_price,
                unrealized_pnl: p.pnl_at(symbol, p.current_price, p.quantity),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_account_summary(&self) -> Result<AccountSummary, ApiError> {
        let state = self.state();
        Ok(AccountSummary {
            account_id: self.account_id.clone(),
            balance: state.balance,
            daily_pnl: state.daily_pnl,
            daily_loss_limit: self.params.daily_loss_limit,
            maximum_loss_limit: self.params.maximum_loss_limit,
            highest_eod_balance: state.highest_eod_balance,
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ApiError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ApiError::Rejected(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if order.order_type != OrderType::Market {
            return Err(ApiError::Rejected(
                "only market entries are simulated".to_string(),
            ));
        }

        let symbol = order.symbol.to_uppercase();
        let order_id = self.next_order_id();
        let mut state = self.state();
        let bar = state
            .last_bar
            .get(&symbol)
            .cloned()
            .ok_or_else(|| ApiError::NoMarketData(symbol.clone()))?;
        let fill_price = self.slippage_price(order.side, &bar);
        Self::apply_fill(&mut state, &symbol, order.side, order.quantity, fill_price);

        let exit_side = order.side.opposite();
        let mut leg = |leg: Leg, price: Option<Decimal>| {
            price.map(|price| {
                let id = self.next_order_id();
                state.working.insert(
                    id.clone(),
                    WorkingOrder {
                        symbol: symbol.clone(),
                        side: exit_side,
                        leg,
                        price,
                        quantity: order.quantity,
                    },
                );
                id
            })
        };
        let stop_order_id = leg(Leg::Stop, order.stop_loss);
        let take_profit_order_id = leg(Leg::TakeProfit, order.take_profit);

        tracing::info!(
            symbol = %symbol,
            side = ?order.side,
            quantity = %order.quantity,
            price = %fill_price,
            strategy = order.strategy.as_deref().unwrap_or("-"),
            "Paper order filled"
        );

        Ok(OrderAck {
            order_id,
            fill_price: Some(fill_price),
            stop_order_id,
            take_profit_order_id,
        })
    }

    async fn modify_order(&self, order_id: &str, price: Decimal) -> Result<(), ApiError> {
        let mut state = self.state();
        let order = state
            .working
            .get_mut(order_id)
            .ok_or_else(|| ApiError::OrderNotFound(order_id.to_string()))?;
        order.price = price;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state
            .working
            .remove(order_id)
            .map(|_| ())
            .ok_or_else(|| ApiError::OrderNotFound(order_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn order(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> OrderRequest {
        OrderRequest {
            client_order_id: uuid::Uuid::nil(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_loss,
            take_profit,
            strategy: Some("test".to_string()),
        }
    }

    fn bar(symbol: &str, secs: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timeframe: Timeframe::parse("5m"),
            timestamp: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(10),
            tick_count: 4,
        }
    }

    #[tokio::test]
    async fn history_returns_the_most_recent_bars_oldest_first() {
        let broker = PaperBroker::new("acct", PaperConfig::default());
        for i in 0..5 {
            let px = Decimal::from(100 + i);
            broker.record_bar(bar("MNQ", 1_700_000_100 + i * 300, px, px, px, px));
        }
        let bars = broker
            .get_historical_data("mnq", &Timeframe::parse("5m"), 3)
            .await
            .unwrap();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(102), dec!(103), dec!(104)]);
    }

    #[tokio::test]
    async fn market_order_without_prices_is_rejected() {
        let broker = PaperBroker::new("acct", PaperConfig::default());
        let err = broker
            .place_order(&order("ES", OrderSide::Buy, dec!(1), None, None))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NoMarketData("ES".to_string()));
    }

    #[tokio::test]
    async fn stop_leg_closes_the_position_and_books_the_loss() {
        let broker = PaperBroker::new("acct", PaperConfig::default());
        broker.record_bar(bar("MNQ", 1_700_000_100, dec!(100), dec!(101), dec!(99), dec!(100)));

        let ack = broker
            .place_order(&order("MNQ", OrderSide::Buy, dec!(2), Some(dec!(95)), Some(dec!(110))))
            .await
            .unwrap();
        assert_eq!(ack.fill_price, Some(dec!(100)));
        assert!(ack.stop_order_id.is_some());
        assert_eq!(broker.get_positions().await.unwrap().len(), 1);

        broker.record_bar(bar("MNQ", 1_700_000_400, dec!(99), dec!(100), dec!(94), dec!(96)));

        assert!(broker.get_positions().await.unwrap().is_empty());
        let summary = broker.get_account_summary().await.unwrap();
        // (95 - 100) * 2 contracts * $2/pt
        assert_eq!(summary.daily_pnl, dec!(-20));
        assert_eq!(summary.balance, dec!(149980));
        let err = broker
            .cancel_order(ack.take_profit_order_id.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn modified_stop_is_respected() {
        let broker = PaperBroker::new("acct", PaperConfig::default());
        broker.record_bar(bar("ES", 1_700_000_100, dec!(5000), dec!(5001), dec!(4999), dec!(5000)));
        let ack = broker
            .place_order(&order("ES", OrderSide::Sell, dec!(1), Some(dec!(5010)), None))
            .await
            .unwrap();
        let stop = ack.stop_order_id.unwrap();
        broker.modify_order(&stop, dec!(5004)).await.unwrap();

        broker.record_bar(bar("ES", 1_700_000_400, dec!(5000), dec!(5005), dec!(4998), dec!(5003)));
        assert!(broker.get_positions().await.unwrap().is_empty());
        let summary = broker.get_account_summary().await.unwrap();
        assert_eq!(summary.daily_pnl, dec!(-200));
    }

    #[tokio::test]
    async fn slippage_moves_fills_against_the_trader() {
        let params = PaperConfig {
            slippage_pct: dec!(0.1),
            ..PaperConfig::default()
        };
        let broker = PaperBroker::new("acct", params);
        broker.record_bar(bar("NQ", 1_700_000_100, dec!(100), dec!(110), dec!(90), dec!(100)));
        let buy = broker
            .place_order(&order("NQ", OrderSide::Buy, dec!(1), None, None))
            .await
            .unwrap();
        assert_eq!(buy.fill_price, Some(dec!(102)));
    }

    #[tokio::test]
    async fn new_day_resets_daily_pnl_and_raises_eod_high() {
        let broker = PaperBroker::new("acct", PaperConfig::default());
        broker.record_bar(bar("MNQ", 1_700_000_100, dec!(100), dec!(100), dec!(100), dec!(100)));
        broker
            .place_order(&order("MNQ", OrderSide::Buy, dec!(1), None, Some(dec!(150))))
            .await
            .unwrap();
        broker.record_bar(bar("MNQ", 1_700_000_400, dec!(100), dec!(151), dec!(100), dec!(150)));
        assert_eq!(broker.get_account_summary().await.unwrap().daily_pnl, dec!(100));

        broker.record_bar(bar("MNQ", 1_700_000_100 + 86_400, dec!(150), dec!(150), dec!(150), dec!(150)));
        let summary = broker.get_account_summary().await.unwrap();
        assert_eq!(summary.daily_pnl, Decimal::ZERO);
        assert_eq!(summary.highest_eod_balance, dec!(150100));
    }
}
