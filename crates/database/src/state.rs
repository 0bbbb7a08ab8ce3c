use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// The persisted snapshot of one strategy for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategyState {
    pub enabled: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Serialized subset of the strategy's config. `Null` when never saved.
    #[serde(default)]
    pub settings: JsonValue,
    #[serde(default)]
    pub metadata: JsonValue,
    pub last_started: Option<DateTime<Utc>>,
    pub last_stopped: Option<DateTime<Utc>>,
}

impl StrategyState {
    /// Keeps the previously stored start/stop times where this snapshot has none.
    pub fn merged_over(mut self, previous: Option<&StrategyState>) -> Self {
        if let Some(previous) = previous {
            self.last_started = self.last_started.or(previous.last_started);
            self.last_stopped = self.last_stopped.or(previous.last_stopped);
        }
        self
    }
}

/// The persistence collaborator of the strategy manager.
///
/// `save_strategy_state` is an upsert; a `None` in `last_started` or
/// `last_stopped` leaves the stored timestamp untouched.
#[async_trait]
pub trait StrategyStateStore: Send + Sync {
    async fn get_strategy_states(
        &self,
        account_id: &str,
    ) -> Result<HashMap<String, StrategyState>, DbError>;

    async fn save_strategy_state(
        &self,
        account_id: &str,
        name: &str,
        state: &StrategyState,
    ) -> Result<(), DbError>;
}

/// Keeps strategy state in process memory. Nothing survives a restart unless
/// the same instance is handed to the next manager.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<String, HashMap<String, StrategyState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved (account, strategy) rows.
    pub fn len(&self) -> usize {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StrategyStateStore for InMemoryStateStore {
    async fn get_strategy_states(
        &self,
        account_id: &str,
    ) -> Result<HashMap<String, StrategyState>, DbError> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(account_id).cloned().unwrap_or_default())
    }

    async fn save_strategy_state(
        &self,
        account_id: &str,
        name: &str,
        state: &StrategyState,
    ) -> Result<(), DbError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let account = states.entry(account_id.to_string()).or_default();
        let merged = state.clone().merged_over(account.get(name));
        account.insert(name.to_string(), merged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn saves_are_scoped_by_account() {
        let store = InMemoryStateStore::new();
        let state = StrategyState {
            enabled: true,
            symbols: vec!["MNQ".into()],
            ..Default::default()
        };
        store.save_strategy_state("a", "trend_following", &state).await.unwrap();

        assert_eq!(store.get_strategy_states("a").await.unwrap().len(), 1);
        assert!(store.get_strategy_states("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_timestamps_keep_the_stored_ones() {
        let store = InMemoryStateStore::new();
        let started = Utc::now();
        let first = StrategyState {
            enabled: true,
            symbols: vec!["ES".into()],
            settings: json!({"position_size": 2}),
            last_started: Some(started),
            ..Default::default()
        };
        store.save_strategy_state("acct", "mean_reversion", &first).await.unwrap();

        let stopped = started + chrono::TimeDelta::minutes(5);
        let second = StrategyState {
            enabled: false,
            symbols: vec!["ES".into()],
            last_stopped: Some(stopped),
            ..Default::default()
        };
        store.save_strategy_state("acct", "mean_reversion", &second).await.unwrap();

        let saved = &store.get_strategy_states("acct").await.unwrap()["mean_reversion"];
        assert!(!saved.enabled);
        assert_eq!(saved.last_started, Some(started));
        assert_eq!(saved.last_stopped, Some(stopped));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let state: StrategyState = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(state.enabled);
        assert!(state.symbols.is_empty());
        assert!(state.settings.is_null());
    }
}
