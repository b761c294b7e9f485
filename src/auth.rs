use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    sub: String,
    email: Option<String>,
    user_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SupabaseUserResponse {
    id: String,
    email: Option<String>,
    user_metadata: Option<Value>,
}

/// Resolves the authenticated owner id or fails with `Unauthorized`.
/// Every mutating route calls this before touching the store.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    Ok(require_supabase_user(state, headers).await?.id)
}

pub async fn require_supabase_user(
    state: &AppState,
    headers: &HeaderMap,
) -> AppResult<SupabaseUser> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = dev_override_user_id(headers) {
            tracing::debug!(user_id = %user_id, "Using dev auth override");
            return Ok(SupabaseUser {
                id: user_id,
                email: None,
                user_metadata: None,
            });
        }
    }

    let Some(token) = bearer_token(headers) else {
        return Err(unauthorized());
    };

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return decode_supabase_jwt(token, secret);
    }

    fetch_supabase_user(state, token).await
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn dev_override_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| uuid::Uuid::try_parse(value).is_ok())
        .map(ToOwned::to_owned)
}

fn decode_supabase_jwt(token: &str, secret: &str) -> AppResult<SupabaseUser> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SUPABASE_AUDIENCE]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Rejected Supabase JWT");
        unauthorized()
    })?;

    if data.claims.sub.trim().is_empty() {
        return Err(unauthorized());
    }

    Ok(SupabaseUser {
        id: data.claims.sub,
        email: data.claims.email,
        user_metadata: data.claims.user_metadata,
    })
}

async fn fetch_supabase_user(state: &AppState, token: &str) -> AppResult<SupabaseUser> {
    let (Some(url), Some(service_key)) = (
        state.config.supabase_auth_user_url(),
        state.config.supabase_service_role_key.as_deref(),
    ) else {
        return Err(AppError::ServiceUnavailable(
            "Authentication is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL."
                .to_string(),
        ));
    };

    let response = state
        .http_client
        .get(url)
        .header("apikey", service_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;

    if !response.status().is_success() {
        tracing::debug!(status = %response.status(), "Supabase rejected access token");
        return Err(unauthorized());
    }

    let user = response
        .json::<SupabaseUserResponse>()
        .await
        .map_err(|error| AppError::Dependency(format!("Invalid Supabase auth response: {error}")))?;

    if user.id.trim().is_empty() {
        return Err(unauthorized());
    }

    Ok(SupabaseUser {
        id: user.id,
        email: user.email,
        user_metadata: user.user_metadata,
    })
}

fn unauthorized() -> AppError {
    AppError::Unauthorized("Unauthorized: missing or invalid access token.".to_string())
}
