use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;

use crate::{config::AppConfig, db::build_pool, error::AppError};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
    pub http_client: Client,
    /// Rendered billing lists keyed by `owner_id|query`.
    pub bill_list_cache: Cache<String, Value>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;
        let http_client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let bill_list_cache = Cache::builder()
            .max_capacity(config.bill_list_cache_max_entries)
            .time_to_live(Duration::from_secs(config.bill_list_cache_ttl_seconds))
            .support_invalidation_closures()
            .build();

        Ok(Self {
            config,
            db_pool,
            http_client,
            bill_list_cache,
        })
    }

    pub fn db_pool(&self) -> Result<&PgPool, AppError> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency(
                "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL."
                    .to_string(),
            )
        })
    }

    /// Drops every cached billing list of one owner.
    pub async fn invalidate_bill_lists(&self, owner_id: &str) {
        let prefix = format!("{owner_id}|");
        if let Err(error) = self
            .bill_list_cache
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!(owner_id, error = %error, "Bill list cache predicate rejected; clearing all");
            self.bill_list_cache.invalidate_all();
        }
        self.bill_list_cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AppState;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn invalidation_drops_only_the_owners_lists() {
        let mut config = AppConfig::from_env();
        config.supabase_db_url = None;
        let state = AppState::build(config).expect("state");

        state
            .bill_list_cache
            .insert("owner-a|all".to_string(), json!([]))
            .await;
        state
            .bill_list_cache
            .insert("owner-b|all".to_string(), json!([]))
            .await;

        state.invalidate_bill_lists("owner-a").await;

        assert!(state.bill_list_cache.get("owner-a|all").await.is_none());
        assert!(state.bill_list_cache.get("owner-b|all").await.is_some());
    }
}
