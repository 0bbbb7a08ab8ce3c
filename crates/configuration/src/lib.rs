use crate::error::ConfigError;
use std::collections::HashSet;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    AggregatorConfig, Config, LoggingConfig, MaType, ManagerConfig, MeanReversionParams,
    PaperConfig, StrategyConfig, StrategyParams, TradingWindow, TrendFollowingParams, normalize_symbols,
};

/// Prefix for environment overrides, e.g. `MERIDIAN__MANAGER__MAX_CONCURRENT_STRATEGIES=5`.
pub const ENV_PREFIX: &str = "MERIDIAN";

/// Loads the application configuration from `config.toml` in the working directory.
///
/// This function is the primary entry point for this crate. The file is optional;
/// environment variables are layered on top, then the result is validated.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Same as [`load_config`], reading the given file instead.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;

    Ok(config)
}

/// Rejects configurations the engine cannot run with.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.aggregator.default_timeframes.is_empty() {
        return Err(ConfigError::ValidationError(
            "aggregator.default_timeframes must not be empty".to_string(),
        ));
    }
    if config.aggregator.broadcast_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "aggregator.broadcast_interval_ms must be positive".to_string(),
        ));
    }
    if config.manager.max_concurrent_strategies == 0 {
        return Err(ConfigError::ValidationError(
            "manager.max_concurrent_strategies must be at least 1".to_string(),
        ));
    }
    if config.manager.loop_interval_secs == 0 || config.manager.market_condition_check_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "manager intervals must be positive".to_string(),
        ));
    }
    for (name, strategy) in &config.strategies {
        let mut seen = HashSet::new();
        for symbol in &strategy.symbols {
            if !seen.insert(symbol.trim().to_uppercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "strategies.{name}.symbols lists '{symbol}' more than once"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::MarketCondition;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/definitely/not/here.toml").unwrap();
        assert_eq!(config.manager.max_concurrent_strategies, 3);
        assert_eq!(config.aggregator.broadcast_interval_ms, 200);
        assert_eq!(config.aggregator.default_timeframes.len(), 9);
    }

    #[test]
    fn reads_sections_from_toml() {
        let file = write_config(
            r#"
            [manager]
            account_id = "PRAC-1"
            max_concurrent_strategies = 2
            auto_select_enabled = true

            [strategies.mean_reversion]
            enabled = true
            symbols = ["mes", "MNQ"]
            avoid_conditions = ["trending"]
            trading_window = { start = "08:00", end = "16:00", no_trade_start = "12:00", no_trade_end = "12:30" }

            [params.mean_reversion]
            rsi_oversold = 25
            "#,
        );
        let config = load_config_from(file.path()).unwrap();

        assert_eq!(config.manager.account_id, "PRAC-1");
        assert!(config.manager.auto_select_enabled);
        assert_eq!(config.params.mean_reversion.rsi_oversold, dec!(25));
        assert_eq!(config.params.mean_reversion.rsi_period, 14);

        let mr = config.strategy_config("mean_reversion");
        assert!(mr.enabled);
        assert_eq!(mr.symbols, vec!["MES".to_string(), "MNQ".to_string()]);
        assert_eq!(mr.avoid_conditions, vec![MarketCondition::TrendingUp]);
        assert_eq!(mr.max_positions, 2);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let file = write_config("[manager]\nmax_concurrent_strategies = 0\n");
        let err = load_config_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let file = write_config("[strategies.trend_following]\nsymbols = [\"MNQ\", \"mnq\"]\n");
        assert!(load_config_from(file.path()).is_err());
    }
}
