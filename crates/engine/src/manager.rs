use crate::error::ManagerError;
use crate::runner::{run_strategy, SharedStrategy};
use crate::selector;
use crate::status::StatusHandle;
use crate::summary::{AggregatedMetrics, ManagerStatus, StrategySummary};
use crate::view::ViewHandle;
use chrono::{DateTime, Utc};
use configuration::{normalize_symbols, Config};
use core_types::{MarketCondition, StrategyStatus};
use database::{StrategyState, StrategyStateStore};
use events::{EventSink, WsMessage};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use strategies::{StrategyError, StrategyFactory};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Upper bound on one `market_condition` call during auto-selection.
const CONDITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a caller-facing operation: `Ok(message)` or a typed rejection.
pub type ManagerResult = Result<String, ManagerError>;

/// A partial change to a loaded strategy's configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrategyConfigUpdate {
    pub symbols: Option<Vec<String>>,
    pub position_size: Option<u32>,
    pub max_positions: Option<u32>,
    /// Variant parameters, same shape as `Strategy::settings()`.
    pub params: Option<Value>,
}

struct Entry {
    instance: SharedStrategy,
    status: StatusHandle,
    view: ViewHandle,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ManagerState {
    registry: Vec<(String, StrategyFactory)>,
    entries: HashMap<String, Entry>,
    /// Start order of the strategies that were started and not yet stopped.
    active: Vec<String>,
    persisted: HashMap<String, StrategyState>,
}

impl ManagerState {
    fn is_registered(&self, name: &str) -> bool {
        self.registry.iter().any(|(n, _)| n == name)
    }

    fn available(&self) -> String {
        self.registry
            .iter()
            .map(|(n, _)| n.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn not_found(&self, name: &str) -> ManagerError {
        ManagerError::StrategyNotFound {
            name: name.to_string(),
            available: self.available(),
        }
    }

    fn status_of(&self, name: &str) -> StrategyStatus {
        self.entries
            .get(name)
            .map(|e| e.status.get())
            .unwrap_or_default()
    }

    /// Names currently `Active`, in start order. Crashed loops do not count.
    fn running(&self) -> Vec<String> {
        self.active
            .iter()
            .filter(|n| self.status_of(n) == StrategyStatus::Active)
            .cloned()
            .collect()
    }
}

struct Inner {
    config: Config,
    store: Arc<dyn StrategyStateStore>,
    events: Option<Arc<dyn EventSink>>,
    state: Mutex<ManagerState>,
    auto_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Registry and scheduler for strategies.
///
/// Instantiates strategies from configuration overlaid with persisted state,
/// runs one task per active strategy under a concurrency cap and optionally
/// rotates strategies by score. All operations are serialised through one
/// async lock; strategy tasks never take it, and it is never held while
/// waiting on a strategy that may be mid-call. Reads go through each
/// strategy's `ViewHandle`.
///
/// Cloning is cheap and yields a handle to the same manager.
#[derive(Clone)]
pub struct StrategyManager {
    inner: Arc<Inner>,
}

impl StrategyManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn StrategyStateStore>,
        events: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                store,
                events,
                state: Mutex::new(ManagerState::default()),
                auto_task: std::sync::Mutex::new(None),
            }),
        }
    }

    fn account_id(&self) -> &str {
        &self.inner.config.manager.account_id
    }

    fn max_concurrent(&self) -> usize {
        self.inner.config.manager.max_concurrent_strategies
    }

    /// Adds (or replaces) a named strategy constructor.
    pub async fn register_strategy(&self, name: &str, factory: StrategyFactory) {
        let mut state = self.inner.state.lock().await;
        match state.registry.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = factory,
            None => state.registry.push((name.to_string(), factory)),
        }
        debug!(strategy = %name, "Strategy registered");
    }

    /// Builds every registered strategy from config plus persisted state.
    ///
    /// Strategies without a stored state get an initial snapshot written back.
    /// A store that cannot be read leaves the manager on its in-memory cache
    /// and nothing is written.
    /// Returns the number of loaded strategies.
    pub async fn load_strategies(&self) -> usize {
        let mut state = self.inner.state.lock().await;

        let read_ok = match self.inner.store.get_strategy_states(self.account_id()).await {
            Ok(persisted) => {
                info!(count = persisted.len(), "Loaded persisted strategy states");
                state.persisted = persisted;
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not read strategy states, using cached state");
                false
            }
        };

        let names: Vec<String> = state.registry.iter().map(|(n, _)| n.clone()).collect();
        for name in &names {
            let first_run = !state.persisted.contains_key(name);
            if let Err(e) = self.instantiate(&mut state, name) {
                error!(strategy = %name, error = %e, "Failed to load strategy");
                continue;
            }
            // Without a successful read the store may hold state we never saw.
            if first_run && read_ok {
                info!(strategy = %name, "No stored state, saving initial snapshot");
                self.persist(&mut state, name, None, None).await;
            }
        }
        state.entries.len()
    }

    /// Starts strategies whose persisted state says enabled and stops running
    /// ones that are disabled. Nothing is persisted by the reconciliation.
    pub async fn apply_persisted_states(&self) -> Vec<(String, ManagerResult)> {
        let mut state = self.inner.state.lock().await;
        let names: Vec<String> = state.registry.iter().map(|(n, _)| n.clone()).collect();
        let mut results = Vec::new();

        for name in names {
            if let Err(e) = self.instantiate(&mut state, &name) {
                results.push((name, Err(e)));
                continue;
            }
            let Some(entry) = state.entries.get(&name) else {
                continue;
            };
            let desired = entry.view.get().config.enabled;
            let running = entry.status.is_active();

            if desired && !running {
                let result = self.start_locked(&mut state, &name, None, false).await;
                if let Err(e) = &result {
                    warn!(strategy = %name, error = %e, "Could not start persisted strategy");
                }
                results.push((name, result));
            } else if !desired && running {
                let result = self.stop_locked(&mut state, &name, false).await;
                results.push((name, result));
            }
        }
        results
    }

    pub async fn start_strategy(
        &self,
        name: &str,
        symbols: Option<Vec<String>>,
        persist: bool,
    ) -> ManagerResult {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state, name, symbols, persist).await
    }

    pub async fn stop_strategy(&self, name: &str, persist: bool) -> ManagerResult {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state, name, persist).await
    }

    /// Tries to start every registered strategy, in registration order.
    pub async fn start_all(&self) -> Vec<(String, ManagerResult)> {
        let mut state = self.inner.state.lock().await;
        let names: Vec<String> = state.registry.iter().map(|(n, _)| n.clone()).collect();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let result = self.start_locked(&mut state, &name, None, true).await;
            results.push((name, result));
        }
        results
    }

    /// Stops every started strategy and aborts any task still around.
    pub async fn stop_all(&self, persist: bool) -> Vec<(String, ManagerResult)> {
        let mut state = self.inner.state.lock().await;
        let names = state.active.clone();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let result = self.stop_locked(&mut state, &name, persist).await;
            results.push((name, result));
        }
        for (name, entry) in state.entries.iter_mut() {
            if let Some(task) = entry.task.take() {
                debug!(strategy = %name, "Aborting leftover strategy task");
                join_aborted(name, task).await;
            }
        }
        results
    }

    /// Applies a partial configuration change and persists it right away.
    ///
    /// A running strategy picks the change up between two steps of its loop;
    /// the manager lock is released while waiting for that.
    pub async fn update_strategy_config(
        &self,
        name: &str,
        update: StrategyConfigUpdate,
    ) -> ManagerResult {
        let (instance, view) = {
            let mut state = self.inner.state.lock().await;
            if !state.is_registered(name) {
                return Err(state.not_found(name));
            }
            self.instantiate(&mut state, name)?;
            let Some(entry) = state.entries.get(name) else {
                return Err(state.not_found(name));
            };
            (Arc::clone(&entry.instance), entry.view.clone())
        };

        let invalid = |source: StrategyError| ManagerError::InvalidSettings {
            name: name.to_string(),
            source,
        };

        let mut patch = match update.params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(invalid(StrategyError::InvalidParameters(format!(
                    "params must be a JSON object, got {other}"
                ))));
            }
        };
        if let Some(size) = update.position_size {
            patch.insert("position_size".to_string(), json!(size));
        }
        if let Some(max) = update.max_positions {
            patch.insert("max_positions".to_string(), json!(max));
        }
        let symbols = match update.symbols {
            Some(raw) => {
                let symbols = normalize_symbols(&raw);
                if symbols.is_empty() {
                    return Err(invalid(StrategyError::InvalidParameters(
                        "symbol list cannot be empty".to_string(),
                    )));
                }
                Some(symbols)
            }
            None => None,
        };

        {
            let mut strategy = instance.lock().await;
            if !patch.is_empty() {
                strategy.apply_settings(&Value::Object(patch)).map_err(invalid)?;
            }
            if let Some(symbols) = symbols {
                strategy.base_mut().config.symbols = symbols;
            }
            view.refresh(&**strategy);
        }

        let mut state = self.inner.state.lock().await;
        self.persist(&mut state, name, None, None).await;
        info!(strategy = %name, "Strategy configuration updated");
        Ok(format!("Strategy {name} configuration updated"))
    }

    /// Scores every enabled strategy against the current market and rotates the
    /// active set to the best ones. Returns the selection, best first.
    pub async fn auto_select_strategies(&self) -> Vec<String> {
        let candidates: Vec<(String, SharedStrategy, ViewHandle)> = {
            let state = self.inner.state.lock().await;
            state
                .registry
                .iter()
                .filter_map(|(name, _)| {
                    let entry = state.entries.get(name)?;
                    Some((name.clone(), Arc::clone(&entry.instance), entry.view.clone()))
                })
                .collect()
        };

        let mut scored = Vec::new();
        for (name, instance, view) in candidates {
            if !view.get().config.enabled {
                continue;
            }
            let conditions = current_conditions(&name, &instance, &view).await;
            let current = view.get();
            let score = selector::score(&current.config, &conditions, &current.metrics);
            debug!(strategy = %name, score, ?conditions, "Strategy scored");
            scored.push((name, score));
        }

        let selected = selector::select_top(scored, self.max_concurrent());
        info!(selected = ?selected, "Auto-selection ranked strategies");

        let mut state = self.inner.state.lock().await;

        for name in state.running() {
            if !selected.contains(&name) {
                if let Err(e) = self.stop_locked(&mut state, &name, false).await {
                    warn!(strategy = %name, error = %e, "Auto-selection could not stop strategy");
                }
            }
        }
        for name in &selected {
            if state.status_of(name) != StrategyStatus::Active {
                if let Err(e) = self.start_locked(&mut state, name, None, false).await {
                    warn!(strategy = %name, error = %e, "Auto-selection could not start strategy");
                }
            }
        }
        selected
    }

    /// Spawns the periodic auto-selection task. Returns `false` when auto
    /// selection is disabled or already running.
    pub fn start_auto_selection(&self) -> bool {
        let manager = &self.inner.config.manager;
        if !manager.auto_select_enabled {
            info!("Auto-selection disabled");
            return false;
        }

        let mut slot = self.inner.auto_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("Auto-selection already running");
            return false;
        }

        let period = Duration::from_secs(manager.market_condition_check_interval_secs);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                StrategyManager { inner }.auto_select_strategies().await;
            }
        }));
        info!(interval_secs = period.as_secs(), "Auto-selection started");
        true
    }

    pub async fn get_strategy_summaries(&self) -> Vec<StrategySummary> {
        let state = self.inner.state.lock().await;
        let mut summaries = Vec::with_capacity(state.registry.len());
        for (name, _) in &state.registry {
            summaries.push(self.summarize(&state, name));
        }
        summaries
    }

    pub async fn get_aggregated_metrics(&self) -> AggregatedMetrics {
        AggregatedMetrics::from_summaries(&self.get_strategy_summaries().await)
    }

    pub async fn get_strategy(&self, name: &str) -> Option<StrategySummary> {
        let state = self.inner.state.lock().await;
        if !state.is_registered(name) {
            return None;
        }
        Some(self.summarize(&state, name))
    }

    pub async fn get_status(&self) -> ManagerStatus {
        let state = self.inner.state.lock().await;
        let registered: Vec<String> = state.registry.iter().map(|(n, _)| n.clone()).collect();
        let loaded = registered
            .iter()
            .filter(|n| state.entries.contains_key(*n))
            .cloned()
            .collect();
        let auto_select_running = self
            .inner
            .auto_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished());

        ManagerStatus {
            registered,
            loaded,
            active: state.running(),
            max_concurrent_strategies: self.max_concurrent(),
            auto_select_enabled: self.inner.config.manager.auto_select_enabled,
            auto_select_running,
        }
    }

    /// Stops auto-selection and every strategy without touching persisted
    /// state, then joins all tasks.
    pub async fn shutdown(&self) {
        let auto = self
            .inner
            .auto_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = auto {
            join_aborted("auto-selection", task).await;
        }

        for (name, result) in self.stop_all(false).await {
            if let Err(e) = result {
                warn!(strategy = %name, error = %e, "Stop during shutdown failed");
            }
        }
        info!("Strategy manager shut down");
    }

    fn instantiate(&self, state: &mut ManagerState, name: &str) -> Result<(), ManagerError> {
        if state.entries.contains_key(name) {
            return Ok(());
        }
        let Some(factory) = state
            .registry
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| Arc::clone(f))
        else {
            return Err(state.not_found(name));
        };

        let mut config = self.inner.config.strategy_config(name);
        let persisted = state.persisted.get(name);
        if let Some(stored) = persisted {
            config.enabled = stored.enabled;
            if !stored.symbols.is_empty() {
                config.set_symbols(&stored.symbols);
            }
        }

        let mut instance = factory(config).map_err(|source| ManagerError::Creation {
            name: name.to_string(),
            source,
        })?;

        if let Some(settings) = persisted.map(|s| &s.settings).filter(|s| s.is_object()) {
            if let Err(e) = instance.apply_settings(settings) {
                warn!(strategy = %name, error = %e, "Ignoring invalid persisted settings");
            }
        }

        let view = ViewHandle::new(&*instance);
        state.entries.insert(
            name.to_string(),
            Entry {
                instance: Arc::new(Mutex::new(instance)),
                status: StatusHandle::default(),
                view,
                task: None,
            },
        );
        debug!(strategy = %name, "Strategy instantiated");
        Ok(())
    }

    async fn start_locked(
        &self,
        state: &mut ManagerState,
        name: &str,
        symbols: Option<Vec<String>>,
        persist: bool,
    ) -> ManagerResult {
        if !state.is_registered(name) {
            return Err(state.not_found(name));
        }
        if state.status_of(name) == StrategyStatus::Active {
            return Err(ManagerError::AlreadyActive(name.to_string()));
        }
        let max = self.max_concurrent();
        if state.running().len() >= max {
            return Err(ManagerError::ConcurrencyLimit(max));
        }

        self.instantiate(state, name)?;
        let Some(entry) = state.entries.get_mut(name) else {
            return Err(state.not_found(name));
        };

        // A loop that crashed earlier leaves its finished handle behind.
        if let Some(stale) = entry.task.take() {
            join_aborted(name, stale).await;
        }

        let own_loop = {
            let mut strategy = entry.instance.lock().await;
            if let Some(symbols) = &symbols {
                strategy.base_mut().config.set_symbols(symbols);
            }
            strategy.base_mut().config.enabled = true;
            entry.view.refresh(&**strategy);
            strategy.manages_own_loop()
        };

        entry.status.set(StrategyStatus::Active);
        let instance = Arc::clone(&entry.instance);
        let status = entry.status.clone();
        let view = entry.view.clone();
        state.active.retain(|n| n != name);
        state.active.push(name.to_string());

        if own_loop {
            if let Err(source) = instance.lock().await.start().await {
                status.set(StrategyStatus::Error);
                state.active.retain(|n| n != name);
                error!(strategy = %name, error = %source, "Strategy start hook failed");
                self.publish(name, StrategyStatus::Error, source.to_string());
                return Err(ManagerError::StartFailed {
                    name: name.to_string(),
                    source,
                });
            }
        } else {
            let interval = Duration::from_secs(self.inner.config.manager.loop_interval_secs);
            let task = tokio::spawn(run_strategy(
                name.to_string(),
                instance,
                status,
                view,
                interval,
                self.inner.events.clone(),
            ));
            if let Some(entry) = state.entries.get_mut(name) {
                entry.task = Some(task);
            }
        }

        if persist {
            self.persist(state, name, Some(Utc::now()), None).await;
        }
        info!(strategy = %name, "Strategy started");
        self.publish(name, StrategyStatus::Active, "started");
        Ok(format!("Strategy {name} started"))
    }

    async fn stop_locked(&self, state: &mut ManagerState, name: &str, persist: bool) -> ManagerResult {
        let Some(entry) = state.entries.get_mut(name) else {
            return Err(ManagerError::NotActive(name.to_string()));
        };
        let previous = entry.status.get();
        if previous == StrategyStatus::Idle {
            return Err(ManagerError::NotActive(name.to_string()));
        }

        entry.status.set(StrategyStatus::Idle);
        let task = entry.task.take();
        let instance = Arc::clone(&entry.instance);
        let view = entry.view.clone();
        state.active.retain(|n| n != name);

        // Aborting drops whatever instance lock the loop was holding.
        if let Some(task) = task {
            join_aborted(name, task).await;
        }

        {
            let mut strategy = instance.lock().await;
            if let Err(e) = strategy.cleanup().await {
                warn!(strategy = %name, error = %e, "Strategy cleanup failed");
            }
            if persist {
                strategy.base_mut().config.enabled = false;
            }
            view.refresh(&**strategy);
        }

        if persist {
            self.persist(state, name, None, Some(Utc::now())).await;
        }
        info!(strategy = %name, from = %previous, "Strategy stopped");
        self.publish(name, StrategyStatus::Idle, "stopped");
        Ok(format!("Strategy {name} stopped"))
    }

    /// Writes the strategy's current state through to the store. A failed write
    /// is logged and the cache is updated anyway.
    async fn persist(
        &self,
        state: &mut ManagerState,
        name: &str,
        last_started: Option<DateTime<Utc>>,
        last_stopped: Option<DateTime<Utc>>,
    ) {
        let Some(entry) = state.entries.get(name) else {
            return;
        };
        let view = entry.view.get();
        let snapshot = StrategyState {
            enabled: view.config.enabled,
            symbols: view.config.symbols,
            settings: view.settings,
            metadata: json!({ "status": entry.status.get().to_string() }),
            last_started,
            last_stopped,
        };

        if let Err(e) = self
            .inner
            .store
            .save_strategy_state(self.account_id(), name, &snapshot)
            .await
        {
            warn!(strategy = %name, error = %e, "Failed to persist strategy state");
        }
        let merged = snapshot.merged_over(state.persisted.get(name));
        state.persisted.insert(name.to_string(), merged);
    }

    fn summarize(&self, state: &ManagerState, name: &str) -> StrategySummary {
        let persisted = state.persisted.get(name);
        let (last_started, last_stopped) = persisted
            .map(|p| (p.last_started, p.last_stopped))
            .unwrap_or_default();

        if let Some(entry) = state.entries.get(name) {
            let view = entry.view.get();
            return StrategySummary {
                name: name.to_string(),
                status: entry.status.get(),
                enabled: view.config.enabled,
                symbols: view.config.symbols,
                position_size: view.config.position_size,
                max_positions: view.config.max_positions,
                open_positions: view.open_positions,
                metrics: view.metrics,
                settings: view.settings,
                last_started,
                last_stopped,
            };
        }

        let mut config = self.inner.config.strategy_config(name);
        if let Some(stored) = persisted {
            config.enabled = stored.enabled;
            if !stored.symbols.is_empty() {
                config.set_symbols(&stored.symbols);
            }
        }
        StrategySummary {
            name: name.to_string(),
            status: StrategyStatus::Idle,
            enabled: config.enabled,
            symbols: config.symbols,
            position_size: config.position_size,
            max_positions: config.max_positions,
            open_positions: 0,
            metrics: Default::default(),
            settings: persisted
                .map(|p| p.settings.clone())
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({})),
            last_started,
            last_stopped,
        }
    }

    fn publish(&self, name: &str, status: StrategyStatus, message: impl Into<String>) {
        let Some(sink) = &self.inner.events else {
            return;
        };
        if let Err(e) = sink.publish(WsMessage::strategy_status(name, status, message)) {
            debug!(strategy = %name, error = %e, "Status event not delivered");
        }
    }
}

/// Fresh market conditions for every symbol of a strategy.
///
/// A strategy that is mid-step is not waited for; it is scored on the
/// conditions its last step left behind.
async fn current_conditions(
    name: &str,
    instance: &SharedStrategy,
    view: &ViewHandle,
) -> Vec<MarketCondition> {
    let Ok(mut strategy) = instance.try_lock() else {
        debug!(strategy = %name, "Strategy busy, scoring on cached conditions");
        return view.get().conditions;
    };

    let symbols = strategy.config().symbols.clone();
    let mut conditions = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let condition =
            match tokio::time::timeout(CONDITION_TIMEOUT, strategy.market_condition(symbol)).await {
                Ok(Ok(condition)) => condition,
                Ok(Err(e)) => {
                    warn!(strategy = %name, symbol = %symbol, error = %e, "Market condition unavailable");
                    MarketCondition::Unknown
                }
                Err(_) => {
                    warn!(strategy = %name, symbol = %symbol, "Market condition timed out");
                    MarketCondition::Unknown
                }
            };
        conditions.push(condition);
    }
    view.refresh(&**strategy);
    conditions
}

/// Aborts `task` and waits for it to wind down. Cancellation is the expected
/// outcome and is not reported.
async fn join_aborted(name: &str, task: JoinHandle<()>) {
    task.abort();
    match task.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(task = %name, error = %e, "Task ended abnormally"),
    }
}
