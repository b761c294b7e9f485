use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const DB_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db = match &state.db_pool {
        Some(pool) => {
            match tokio::time::timeout(DB_PROBE_TIMEOUT, sqlx::query("SELECT 1").fetch_one(pool))
                .await
            {
                Ok(Ok(_)) => "ok",
                Ok(Err(error)) => {
                    tracing::error!(error = %error, "Health check DB query failed");
                    "unreachable"
                }
                Err(_) => {
                    tracing::error!("Health check DB query timed out (3s)");
                    "unreachable"
                }
            }
        }
        None => "not_configured",
    };

    let status = if db == "unreachable" { "degraded" } else { "ok" };
    Json(json!({
        "status": status,
        "app": state.config.app_name,
        "environment": state.config.environment,
        "now": Utc::now().to_rfc3339(),
        "db": db,
    }))
}

#[cfg(test)]
mod tests {
    use axum::extract::State;

    use super::health;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn reports_ok_without_a_configured_database() {
        let mut config = AppConfig::from_env();
        config.supabase_db_url = None;
        let state = AppState::build(config).expect("state");
        let body = health(State(state)).await.0;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["db"], "not_configured");
    }
}
