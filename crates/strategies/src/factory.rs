use crate::error::StrategyError;
use crate::mean_reversion::MeanReversion;
use crate::trend_following::TrendFollowing;
use crate::Strategy;
use api_client::BrokerClient;
use configuration::{StrategyConfig, StrategyParams};
use std::sync::Arc;

/// Builds a fresh strategy instance from its (already overlaid) config.
pub type StrategyFactory =
    Arc<dyn Fn(StrategyConfig) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync>;

/// Names of the variants `create_strategy` knows about.
pub const BUILTIN_STRATEGIES: [&str; 2] = [TrendFollowing::NAME, MeanReversion::NAME];

/// Creates a new strategy instance based on the provided name and configuration.
pub fn create_strategy(
    name: &str,
    config: StrategyConfig,
    params: &StrategyParams,
    broker: Arc<dyn BrokerClient>,
) -> Result<Box<dyn Strategy>, StrategyError> {
    match name {
        TrendFollowing::NAME => {
            let params = params.trend_following.clone();
            Ok(Box::new(TrendFollowing::new(config, params, broker)?))
        }
        MeanReversion::NAME => {
            let params = params.mean_reversion.clone();
            Ok(Box::new(MeanReversion::new(config, params, broker)?))
        }
        other => Err(StrategyError::StrategyNotFound(other.to_string())),
    }
}

/// One factory per built-in variant, ready to hand to the manager's registry.
pub fn builtin_factories(
    params: &StrategyParams,
    broker: Arc<dyn BrokerClient>,
) -> Vec<(&'static str, StrategyFactory)> {
    BUILTIN_STRATEGIES
        .iter()
        .map(|&name| {
            let params = params.clone();
            let broker = Arc::clone(&broker);
            let factory: StrategyFactory = Arc::new(move |config: StrategyConfig| {
                create_strategy(name, config, &params, Arc::clone(&broker))
            });
            (name, factory)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::PaperBroker;
    use configuration::PaperConfig;

    fn broker() -> Arc<dyn BrokerClient> {
        Arc::new(PaperBroker::new("acct", PaperConfig::default()))
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = create_strategy(
            "overnight_range",
            StrategyConfig::named("overnight_range"),
            &StrategyParams::default(),
            broker(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StrategyError::StrategyNotFound(name) if name == "overnight_range"));
    }

    #[test]
    fn builtin_factories_build_named_instances() {
        let factories = builtin_factories(&StrategyParams::default(), broker());
        assert_eq!(factories.len(), 2);
        for (name, factory) in factories {
            let strategy = factory(StrategyConfig::named(name)).unwrap();
            assert_eq!(strategy.name(), name);
            assert!(!strategy.manages_own_loop());
        }
    }
}
