use strategies::StrategyError;
use thiserror::Error;

/// Caller-facing rejections from the strategy manager. None of these are fatal;
/// `to_string()` is the message shown to the operator.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Strategy not found: {name}. Available: {available}")]
    StrategyNotFound { name: String, available: String },

    #[error("Strategy already active: {0}")]
    AlreadyActive(String),

    #[error("Strategy not active: {0}")]
    NotActive(String),

    #[error("Max concurrent strategies limit reached ({0})")]
    ConcurrencyLimit(usize),

    #[error("Strategy '{name}' could not be created: {source}")]
    Creation {
        name: String,
        source: StrategyError,
    },

    #[error("Strategy '{name}' failed to start: {source}")]
    StartFailed {
        name: String,
        source: StrategyError,
    },

    #[error("Invalid settings for '{name}': {source}")]
    InvalidSettings {
        name: String,
        source: StrategyError,
    },
}
