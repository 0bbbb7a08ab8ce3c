use crate::DbError;
use crate::state::{StrategyState, StrategyStateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::collections::HashMap;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StrategyStateStore for DbRepository {
    async fn get_strategy_states(
        &self,
        account_id: &str,
    ) -> Result<HashMap<String, StrategyState>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT strategy_name, enabled, symbols, settings, metadata, last_started, last_stopped
            FROM strategy_states
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut states = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("strategy_name")?;
            let state = StrategyState {
                enabled: row.try_get("enabled")?,
                symbols: row.try_get::<Vec<String>, _>("symbols")?,
                settings: row.try_get::<JsonValue, _>("settings")?,
                metadata: row.try_get::<JsonValue, _>("metadata")?,
                last_started: row.try_get::<Option<DateTime<Utc>>, _>("last_started")?,
                last_stopped: row.try_get::<Option<DateTime<Utc>>, _>("last_stopped")?,
            };
            states.insert(name, state);
        }

        tracing::debug!(account_id, count = states.len(), "Loaded strategy states");
        Ok(states)
    }

    /// Upserts one row. Uses `COALESCE` so a snapshot without timestamps keeps
    /// the ones already stored.
    async fn save_strategy_state(
        &self,
        account_id: &str,
        name: &str,
        state: &StrategyState,
    ) -> Result<(), DbError> {
        let settings = non_null(&state.settings);
        let metadata = non_null(&state.metadata);

        sqlx::query(
            r#"
            INSERT INTO strategy_states (
                account_id, strategy_name, enabled, symbols, settings, metadata,
                last_started, last_stopped, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (account_id, strategy_name) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                symbols = EXCLUDED.symbols,
                settings = EXCLUDED.settings,
                metadata = EXCLUDED.metadata,
                last_started = COALESCE(EXCLUDED.last_started, strategy_states.last_started),
                last_stopped = COALESCE(EXCLUDED.last_stopped, strategy_states.last_stopped),
                updated_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(name)
        .bind(state.enabled)
        .bind(&state.symbols)
        .bind(settings)
        .bind(metadata)
        .bind(state.last_started)
        .bind(state.last_stopped)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// JSONB columns are NOT NULL; store `{}` for an absent value.
fn non_null(value: &JsonValue) -> JsonValue {
    if value.is_null() {
        JsonValue::Object(Default::default())
    } else {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_json_is_stored_as_empty_object() {
        assert_eq!(non_null(&JsonValue::Null), json!({}));
        assert_eq!(non_null(&json!({"a": 1})), json!({"a": 1}));
    }
}
