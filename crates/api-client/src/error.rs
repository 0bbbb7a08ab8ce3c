use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("The broker request failed: {0}")]
    Request(String),

    #[error("The broker rejected the order: {0}")]
    Rejected(String),

    #[error("No market data available for {0}")]
    NoMarketData(String),

    #[error("Order '{0}' not found")]
    OrderNotFound(String),

    #[error("Invalid data format from broker: {0}")]
    InvalidData(String),
}
