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
    repository::table_service::{create_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, BuildingPath,
        BuildingsQuery, CreateBuildingInput, UpdateBuildingInput,
    },
    state::AppState,
    tenancy::assert_building_owner,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/buildings",
            axum::routing::get(list_buildings).post(create_building),
        )
        .route(
            "/buildings/{building_id}",
            axum::routing::get(get_building).patch(update_building),
        )
}

async fn list_buildings(
    State(state): State<AppState>,
    Query(query): Query<BuildingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(user_id));
    let rows = list_rows(
        pool,
        "buildings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_building(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBuildingInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    ensure_finite_rate(payload.electricity_rate)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::UnprocessableEntity(
            "Building name is required.".to_string(),
        ));
    }
    let pool = state.db_pool()?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "name".to_string(),
        Value::String(payload.name.trim().to_string()),
    );
    record.insert("owner_id".to_string(), Value::String(user_id.clone()));
    if !record.contains_key("electricity_rate") {
        record.insert(
            "electricity_rate".to_string(),
            json!(state.config.default_electricity_rate),
        );
    }

    let created = create_row(pool, "buildings", &record).await?;
    tracing::info!(owner_id = %user_id, "Building created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_building(
    State(state): State<AppState>,
    Path(path): Path<BuildingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let mut building = assert_building_owner(pool, &user_id, &path.building_id).await?;

    let mut filters = Map::new();
    filters.insert(
        "building_id".to_string(),
        Value::String(path.building_id.trim().to_string()),
    );
    let flats = list_rows(pool, "flats", Some(&filters), 500, 0, "flat_code", true).await?;

    if let Some(object) = building.as_object_mut() {
        object.insert("flats".to_string(), Value::Array(flats));
    }
    Ok(Json(building))
}

async fn update_building(
    State(state): State<AppState>,
    Path(path): Path<BuildingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBuildingInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    ensure_finite_rate(payload.electricity_rate)?;
    let pool = state.db_pool()?;
    assert_building_owner(pool, &user_id, &path.building_id).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(name) = payload.name.as_deref() {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::UnprocessableEntity(
                "Building name cannot be blank.".to_string(),
            ));
        }
        patch.insert("name".to_string(), Value::String(name.to_string()));
    }

    let updated = update_row(pool, "buildings", path.building_id.trim(), &patch, "id").await?;
    Ok(Json(updated))
}

fn ensure_finite_rate(rate: Option<f64>) -> AppResult<()> {
    match rate {
        Some(value) if !value.is_finite() => Err(AppError::UnprocessableEntity(
            "electricity_rate must be a finite number.".to_string(),
        )),
        _ => Ok(()),
    }
}
