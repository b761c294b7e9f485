use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::AppResult,
    repository::table_service::{count_rows, list_rows},
    services::{
        bill_ledger::unpaid_bills,
        billing::{outstanding_amount, round_currency},
    },
    state::AppState,
};

const OLDEST_UNPAID_LIMIT: usize = 5;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/dashboard", axum::routing::get(dashboard))
}

async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let mut by_owner = Map::new();
    by_owner.insert("owner_id".to_string(), Value::String(user_id.clone()));
    let buildings = list_rows(pool, "buildings", Some(&by_owner), 500, 0, "created_at", true).await?;
    let building_ids = buildings
        .iter()
        .filter_map(|building| building.get("id").cloned())
        .collect::<Vec<_>>();

    let mut flat_filters = Map::new();
    flat_filters.insert("building_id__in".to_string(), Value::Array(building_ids));
    let flat_count = count_rows(pool, "flats", Some(&flat_filters)).await?;

    let mut active_filters = by_owner.clone();
    active_filters.insert("is_active".to_string(), Value::Bool(true));
    let active_tenants = count_rows(pool, "tenants", Some(&active_filters)).await?;

    let unpaid = unpaid_bills(pool, &user_id).await?;
    let summary = summarize_dues(&unpaid);

    Ok(Json(json!({
        "buildings": buildings.len(),
        "flats": flat_count,
        "active_tenants": active_tenants,
        "unpaid_bills": unpaid.len(),
        "total_dues": summary.total_dues,
        "oldest_unpaid": summary.oldest,
    })))
}

struct DuesSummary {
    total_dues: f64,
    oldest: Vec<Value>,
}

/// `unpaid` is expected oldest first.
fn summarize_dues(unpaid: &[Value]) -> DuesSummary {
    let total_dues = round_currency(unpaid.iter().map(outstanding_amount).sum());
    let oldest = unpaid
        .iter()
        .take(OLDEST_UNPAID_LIMIT)
        .map(|bill| {
            let mut entry = bill.clone();
            if let Some(object) = entry.as_object_mut() {
                object.insert(
                    "outstanding_amount".to_string(),
                    json!(outstanding_amount(bill)),
                );
            }
            entry
        })
        .collect();
    DuesSummary { total_dues, oldest }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::summarize_dues;

    #[test]
    fn sums_outstanding_and_keeps_five_oldest() {
        let unpaid = vec![
            json!({"billing_month": "2025-11", "status": "Due", "total_amount": 9200}),
            json!({"billing_month": "2025-12", "status": "Partial", "total_amount": 9200, "paid_amount": 5000}),
            json!({"billing_month": "2026-01", "status": "Pending", "total_amount": 100.5}),
            json!({"billing_month": "2026-02", "status": "Due", "total_amount": 1}),
            json!({"billing_month": "2026-03", "status": "Due", "total_amount": 1}),
            json!({"billing_month": "2026-04", "status": "Due", "total_amount": 1}),
        ];
        let summary = summarize_dues(&unpaid);
        assert_eq!(summary.total_dues, 13503.5);
        assert_eq!(summary.oldest.len(), 5);
        assert_eq!(summary.oldest[0]["billing_month"], "2025-11");
        assert_eq!(summary.oldest[1]["outstanding_amount"], json!(4200.0));
    }
}
