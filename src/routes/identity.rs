use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_supabase_user,
    error::{AppError, AppResult},
    repository::table_service::update_row,
    schemas::{validate_input, UpdateOwnerInput},
    state::AppState,
    tenancy::ensure_owner_profile,
};

const SUPPORTED_LANGUAGES: &[&str] = &["en", "hi"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/me", axum::routing::get(me))
        .route("/owners/me", axum::routing::patch(update_owner_settings))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_supabase_user(&state, &headers).await?;
    let pool = state.db_pool()?;
    let owner = ensure_owner_profile(pool, &user).await?;

    Ok(Json(json!({
        "user": {
            "id": user.id,
            "email": user.email,
        },
        "owner": owner,
    })))
}

async fn update_owner_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOwnerInput>,
) -> AppResult<Json<Value>> {
    let user = require_supabase_user(&state, &headers).await?;
    validate_input(&payload)?;
    let patch = owner_settings_patch(&payload)?;

    let pool = state.db_pool()?;
    ensure_owner_profile(pool, &user).await?;
    let updated = update_row(pool, "owners", &user.id, &patch, "id").await?;

    tracing::info!(owner_id = %user.id, "Owner settings updated");
    Ok(Json(updated))
}

fn owner_settings_patch(payload: &UpdateOwnerInput) -> AppResult<Map<String, Value>> {
    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::UnprocessableEntity("Name is required.".to_string()));
    }
    let lang = payload.preferred_lang.trim().to_ascii_lowercase();
    if lang.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "Language preference is required.".to_string(),
        ));
    }
    if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
        return Err(AppError::UnprocessableEntity(format!(
            "Unsupported language '{lang}'. Allowed: {}",
            SUPPORTED_LANGUAGES.join(", ")
        )));
    }

    let mut patch = Map::new();
    patch.insert("full_name".to_string(), Value::String(full_name.to_string()));
    patch.insert("preferred_lang".to_string(), Value::String(lang));
    patch.insert("phone".to_string(), blank_to_null(payload.phone.as_deref()));
    patch.insert("upi_id".to_string(), blank_to_null(payload.upi_id.as_deref()));

    if payload.clear_profile_url {
        patch.insert("profile_url".to_string(), Value::Null);
    } else if let Some(url) = non_empty_opt(payload.profile_url.as_deref()) {
        patch.insert("profile_url".to_string(), Value::String(url));
    }
    if payload.clear_upi_qr_url {
        patch.insert("upi_qr_url".to_string(), Value::Null);
    } else if let Some(url) = non_empty_opt(payload.upi_qr_url.as_deref()) {
        patch.insert("upi_qr_url".to_string(), Value::String(url));
    }

    Ok(patch)
}

fn blank_to_null(value: Option<&str>) -> Value {
    non_empty_opt(value).map(Value::String).unwrap_or(Value::Null)
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
