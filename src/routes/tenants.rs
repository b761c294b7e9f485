use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input,
        CheckoutTenantInput, CreateTenantInput, TenantPath, TenantsQuery, UpdateTenantInput,
    },
    services::{
        bill_ledger::last_reading,
        occupancy::{checkout_tenant, onboard_tenant, parse_final_reading},
    },
    state::AppState,
    tenancy::{assert_flat_owner, assert_tenant_owner},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants",
            axum::routing::get(list_tenants).post(create_tenant),
        )
        .route(
            "/tenants/{tenant_id}",
            axum::routing::get(get_tenant).patch(update_tenant),
        )
        .route(
            "/tenants/{tenant_id}/checkout",
            axum::routing::post(checkout),
        )
        .route(
            "/tenants/{tenant_id}/last-reading",
            axum::routing::get(get_last_reading),
        )
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(user_id));
    if let Some(active) = query.active {
        filters.insert("is_active".to_string(), Value::Bool(active));
    }
    if let Some(flat_id) = non_empty_opt(query.flat_id.as_deref()) {
        filters.insert("flat_id".to_string(), Value::String(flat_id));
    }

    let rows = list_rows(
        pool,
        "tenants",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<CreateTenantInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    payload.email = non_empty_opt(payload.email.as_deref());
    validate_input(&payload)?;
    if payload.name.trim().is_empty() || payload.phone.trim().is_empty() {
        return Err(AppError::UnprocessableEntity(
            "Tenant name and phone are required.".to_string(),
        ));
    }
    let pool = state.db_pool()?;

    let change = onboard_tenant(pool, &user_id, &payload, state.config.billing_timezone).await?;
    state.invalidate_bill_lists(&user_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "tenant": change.tenant,
            "flat": change.flat,
        })),
    ))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let mut tenant = assert_tenant_owner(pool, &user_id, &path.tenant_id).await?;
    let tenant_id = path.tenant_id.trim().to_string();

    let flat_id = value_str(&tenant, "flat_id");
    let (flat, building) = if flat_id.is_empty() {
        (Value::Null, Value::Null)
    } else {
        match assert_flat_owner(pool, &user_id, &flat_id).await {
            Ok((flat, building)) => (flat, building),
            Err(AppError::NotFound(_)) => (Value::Null, Value::Null),
            Err(error) => return Err(error),
        }
    };

    let mut by_tenant = Map::new();
    by_tenant.insert("tenant_id".to_string(), Value::String(tenant_id));
    let bills = list_rows(pool, "bills", Some(&by_tenant), 500, 0, "billing_month", false).await?;
    let documents =
        list_rows(pool, "documents", Some(&by_tenant), 200, 0, "created_at", false).await?;

    if let Some(object) = tenant.as_object_mut() {
        object.insert("flat".to_string(), flat);
        object.insert("building".to_string(), building);
        object.insert("bills".to_string(), Value::Array(bills));
        object.insert("documents".to_string(), Value::Array(documents));
    }
    Ok(Json(tenant))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
    Json(mut payload): Json<UpdateTenantInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    payload.email = non_empty_opt(payload.email.as_deref());
    validate_input(&payload)?;
    let patch = tenant_profile_patch(&payload)?;
    let pool = state.db_pool()?;
    assert_tenant_owner(pool, &user_id, &path.tenant_id).await?;

    let updated = update_row(pool, "tenants", path.tenant_id.trim(), &patch, "id").await?;
    state.invalidate_bill_lists(&user_id).await;
    Ok(Json(updated))
}

async fn checkout(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
    payload: Option<Json<CheckoutTenantInput>>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let final_reading = parse_final_reading(payload.final_meter_reading.as_ref())?;
    let pool = state.db_pool()?;

    let change = checkout_tenant(
        pool,
        &user_id,
        &path.tenant_id,
        final_reading,
        state.config.billing_timezone,
    )
    .await?;
    state.invalidate_bill_lists(&user_id).await;

    Ok(Json(json!({
        "tenant": change.tenant,
        "flat": change.flat,
    })))
}

async fn get_last_reading(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let tenant = assert_tenant_owner(pool, &user_id, &path.tenant_id).await?;

    let reading = last_reading(pool, &tenant).await?;
    Ok(Json(json!({
        "tenant_id": path.tenant_id.trim(),
        "previous_reading": reading,
    })))
}

/// Profile columns to write. `join_date` is checked here so a malformed
/// date never reaches the store.
fn tenant_profile_patch(payload: &UpdateTenantInput) -> AppResult<Map<String, Value>> {
    let mut patch = remove_nulls(serialize_to_map(payload));
    for key in ["name", "phone"] {
        if let Some(Value::String(text)) = patch.get_mut(key) {
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::UnprocessableEntity(format!(
                    "Tenant {key} cannot be blank."
                )));
            }
            *text = trimmed;
        }
    }

    match non_empty_opt(payload.join_date.as_deref()) {
        Some(raw) => {
            let join_date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                AppError::UnprocessableEntity("join_date must be a YYYY-MM-DD date.".to_string())
            })?;
            patch.insert(
                "join_date".to_string(),
                Value::String(join_date.to_string()),
            );
        }
        None => {
            patch.remove("join_date");
        }
    }

    if payload.clear_profile_url {
        patch.insert("profile_url".to_string(), Value::Null);
    } else if let Some(url) = non_empty_opt(payload.profile_url.as_deref()) {
        patch.insert("profile_url".to_string(), Value::String(url));
    } else {
        patch.remove("profile_url");
    }

    if patch.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "No fields to update.".to_string(),
        ));
    }
    Ok(patch)
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
