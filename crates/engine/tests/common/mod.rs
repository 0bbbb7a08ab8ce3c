#![allow(dead_code)]

use api_client::PaperBroker;
use async_trait::async_trait;
use configuration::{Config, PaperConfig, StrategyConfig};
use core_types::{MarketCondition, TradeSignal};
use database::{DbError, InMemoryStateStore, StrategyState, StrategyStateStore};
use engine::StrategyManager;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strategies::base::{merge_into, overlay};
use strategies::{Strategy, StrategyBase, StrategyError, StrategyFactory, TradeGate};

/// What a `RecordingStrategy` has been asked to do, shared with the test.
#[derive(Default)]
pub struct Recorder {
    pub passes: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub analyzed: Mutex<Vec<String>>,
    pub panic_on_analyze: AtomicBool,
    /// `analyze` never returns while set.
    pub hang_on_analyze: AtomicBool,
}

impl Recorder {
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingParams {
    pub threshold: u32,
}

/// Never trades; records every call the manager makes.
pub struct RecordingStrategy {
    base: StrategyBase,
    params: RecordingParams,
    condition: MarketCondition,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Strategy for RecordingStrategy {
    fn name(&self) -> &str {
        &self.base.config.name
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StrategyBase {
        &mut self.base
    }

    fn should_trade(&self, _symbol: &str) -> TradeGate {
        TradeGate::Allowed
    }

    async fn market_condition(&mut self, symbol: &str) -> Result<MarketCondition, StrategyError> {
        self.base.remember_condition(symbol, self.condition);
        Ok(self.condition)
    }

    async fn analyze(&mut self, symbol: &str) -> Result<Option<TradeSignal>, StrategyError> {
        if self.recorder.panic_on_analyze.load(Ordering::SeqCst) {
            panic!("analyze blew up on {symbol}");
        }
        if self.recorder.hang_on_analyze.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.recorder.analyzed.lock().unwrap().push(symbol.to_string());
        Ok(None)
    }

    async fn execute(&mut self, _signal: &TradeSignal) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn manage_positions(&mut self) -> Result<(), StrategyError> {
        self.recorder.passes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.recorder.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn settings(&self) -> Result<Value, StrategyError> {
        let mut map = Map::new();
        merge_into(&mut map, &self.base.common_settings())?;
        merge_into(&mut map, &self.params)?;
        Ok(Value::Object(map))
    }

    fn apply_settings(&mut self, settings: &Value) -> Result<(), StrategyError> {
        let params = overlay(&self.params, settings)?;
        self.base.apply_common_settings(settings)?;
        self.params = params;
        Ok(())
    }
}

pub fn factory(condition: MarketCondition, recorder: Arc<Recorder>) -> StrategyFactory {
    let broker = Arc::new(PaperBroker::new("test", PaperConfig::default()));
    Arc::new(move |config: StrategyConfig| -> Result<Box<dyn Strategy>, StrategyError> {
        let strategy = RecordingStrategy {
            base: StrategyBase::new(config, broker.clone()),
            params: RecordingParams { threshold: 1 },
            condition,
            recorder: Arc::clone(&recorder),
        };
        Ok(Box::new(strategy))
    })
}

/// A config with `max` concurrent strategies and each of `enabled` switched on.
pub fn config(max: usize, enabled: &[&str]) -> Config {
    let mut config = Config::default();
    config.manager.account_id = "acct-1".to_string();
    config.manager.max_concurrent_strategies = max;
    for name in enabled {
        config.strategies.insert(
            name.to_string(),
            StrategyConfig {
                enabled: true,
                ..StrategyConfig::named(name)
            },
        );
    }
    config
}

/// A manager with one `RecordingStrategy` per name, all in `condition`.
pub async fn manager_with(
    config: &Config,
    store: Arc<dyn StrategyStateStore>,
    names: &[&str],
    condition: MarketCondition,
) -> (StrategyManager, Vec<Arc<Recorder>>) {
    let manager = StrategyManager::new(config, store, None);
    let mut recorders = Vec::new();
    for name in names {
        let recorder = Arc::new(Recorder::default());
        manager
            .register_strategy(name, factory(condition, Arc::clone(&recorder)))
            .await;
        recorders.push(recorder);
    }
    (manager, recorders)
}

/// An in-memory store whose reads and writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStateStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl StrategyStateStore for FlakyStore {
    async fn get_strategy_states(
        &self,
        account_id: &str,
    ) -> Result<HashMap<String, StrategyState>, DbError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("read refused".to_string()));
        }
        self.inner.get_strategy_states(account_id).await
    }

    async fn save_strategy_state(
        &self,
        account_id: &str,
        name: &str,
        state: &StrategyState,
    ) -> Result<(), DbError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("write refused".to_string()));
        }
        self.inner.save_strategy_state(account_id, name, state).await
    }
}
