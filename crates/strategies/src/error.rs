use api_client::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("An error occurred during indicator calculation: {0}")]
    IndicatorError(String),

    #[error("Strategy of type '{0}' not found or implemented")]
    StrategyNotFound(String),

    #[error("Broker call failed: {0}")]
    Broker(#[from] ApiError),

    #[error("Invalid strategy settings: {0}")]
    Settings(#[from] serde_json::Error),
}
