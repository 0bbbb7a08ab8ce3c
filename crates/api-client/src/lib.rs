//! # Meridian Broker Client
//!
//! The narrow interface strategies use to reach the outside market: historical
//! bars, open positions, account figures and order placement. The engine itself
//! never talks to a broker; only concrete `Strategy` implementations do.
//!
//! ## Public API
//!
//! - `BrokerClient`: the collaborator trait.
//! - `PaperBroker`: an in-process implementation backed by the aggregator's
//!   completed bars, used for paper trading and tests.
//! - `BrokerPosition`, `AccountSummary`, `OrderAck`: response types.
//! - `ApiError`: the specific error types that can be returned from this crate.

use async_trait::async_trait;
use core_types::{Bar, OrderRequest, Timeframe};
use rust_decimal::Decimal;

pub mod error;
pub mod paper;
pub mod types;

// --- Public API ---
pub use error::ApiError;
pub use paper::PaperBroker;
pub use types::{AccountSummary, BrokerPosition, OrderAck};

/// The generic, abstract interface for a broker / market-data provider.
/// Strategies hold an `Arc<dyn BrokerClient>`, allowing the underlying
/// implementation (live or paper) to be swapped out.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetches up to `limit` most recent completed bars, oldest first.
    async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError>;

    /// Fetches all currently open positions.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, ApiError>;

    /// Fetches balance and loss-limit figures for the trading account.
    async fn get_account_summary(&self) -> Result<AccountSummary, ApiError>;

    /// Places a new order, with protective legs when `stop_loss`/`take_profit` are set.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ApiError>;

    /// Moves the trigger price of a working order.
    async fn modify_order(&self, order_id: &str, price: Decimal) -> Result<(), ApiError>;

    /// Cancels a working order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError>;
}
