use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// A builder was finalised before it received any tick.
    #[error("Bar for {symbol} {timeframe} has no data")]
    EmptyBar { symbol: String, timeframe: String },
}
