use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, list_rows},
    schemas::{
        clamp_limit_in_range, validate_input, CreateFlatInput, FlatPath, FlatsQuery,
        UpdateFlatStatusInput,
    },
    services::occupancy::{occupancy_patch, set_flat_status, FlatOccupancy},
    state::AppState,
    tenancy::{assert_building_owner, assert_flat_owner},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/flats", axum::routing::get(list_flats).post(create_flat))
        .route("/flats/{flat_id}", axum::routing::get(get_flat))
        .route(
            "/flats/{flat_id}/status",
            axum::routing::patch(update_flat_status),
        )
}

async fn list_flats(
    State(state): State<AppState>,
    Query(query): Query<FlatsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let building_ids = match non_empty_opt(query.building_id.as_deref()) {
        Some(building_id) => {
            assert_building_owner(pool, &user_id, &building_id).await?;
            vec![Value::String(building_id)]
        }
        None => {
            let mut owner_filter = Map::new();
            owner_filter.insert("owner_id".to_string(), Value::String(user_id.clone()));
            list_rows(pool, "buildings", Some(&owner_filter), 500, 0, "created_at", true)
                .await?
                .iter()
                .filter_map(|building| building.get("id").cloned())
                .collect()
        }
    };

    let mut filters = Map::new();
    filters.insert("building_id__in".to_string(), Value::Array(building_ids));
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        let status = FlatOccupancy::parse(&status)?;
        filters.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "flats",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "flat_code",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_flat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateFlatInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let flat_code = payload.flat_code.trim();
    if flat_code.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "Flat code is required.".to_string(),
        ));
    }
    if !payload.rent_amount.is_finite() {
        return Err(AppError::UnprocessableEntity(
            "rent_amount must be a finite number.".to_string(),
        ));
    }
    let pool = state.db_pool()?;
    assert_building_owner(pool, &user_id, &payload.building_id).await?;

    let mut record = occupancy_patch(FlatOccupancy::Vacant, None);
    record.insert(
        "building_id".to_string(),
        Value::String(payload.building_id.trim().to_string()),
    );
    record.insert("flat_code".to_string(), Value::String(flat_code.to_string()));
    record.insert("rent_amount".to_string(), json!(payload.rent_amount));
    if let Some(floor) = payload.floor {
        record.insert("floor".to_string(), json!(floor));
    }

    let created = create_row(pool, "flats", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_flat(
    State(state): State<AppState>,
    Path(path): Path<FlatPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let (mut flat, building) = assert_flat_owner(pool, &user_id, &path.flat_id).await?;

    let mut filters = Map::new();
    filters.insert(
        "flat_id".to_string(),
        Value::String(path.flat_id.trim().to_string()),
    );
    filters.insert("is_active".to_string(), Value::Bool(true));
    let active_tenant = list_rows(pool, "tenants", Some(&filters), 1, 0, "created_at", false)
        .await?
        .into_iter()
        .next();

    if let Some(object) = flat.as_object_mut() {
        object.insert("building".to_string(), building);
        object.insert(
            "active_tenant".to_string(),
            active_tenant.unwrap_or(Value::Null),
        );
    }
    Ok(Json(flat))
}

async fn update_flat_status(
    State(state): State<AppState>,
    Path(path): Path<FlatPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateFlatStatusInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let target = FlatOccupancy::parse(&payload.status)?;
    let pool = state.db_pool()?;
    let updated = set_flat_status(pool, &user_id, &path.flat_id, target).await?;
    Ok(Json(updated))
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
