//! Owner scoping. Every lookup answers "not found or not authorized" for
//! both missing rows and rows owned by someone else.

use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::{
    auth::SupabaseUser,
    error::{AppError, AppResult},
};

pub fn not_found(entity: &str) -> AppError {
    AppError::NotFound(format!("{entity} not found or not authorized."))
}

fn is_uuid(value: &str) -> bool {
    uuid::Uuid::try_parse(value.trim()).is_ok()
}

fn row_json(row: Option<sqlx::postgres::PgRow>, column: &str) -> Option<Value> {
    row.and_then(|value| value.try_get::<Option<Value>, _>(column).ok().flatten())
}

fn dependency(error: sqlx::Error) -> AppError {
    AppError::Dependency(format!("Supabase request failed: {error}"))
}

/// Returns the caller's `owners` row, creating it on first sight.
pub async fn ensure_owner_profile(pool: &PgPool, user: &SupabaseUser) -> AppResult<Value> {
    if !is_uuid(&user.id) {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let full_name = resolve_full_name(user);

    sqlx::query(
        "INSERT INTO owners (id, full_name, preferred_lang)
         VALUES ($1::uuid, $2, 'en')
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&user.id)
    .bind(&full_name)
    .execute(pool)
    .await
    .map_err(dependency)?;

    let row = sqlx::query("SELECT row_to_json(t) AS row FROM owners t WHERE t.id = $1::uuid")
        .bind(&user.id)
        .fetch_optional(pool)
        .await
        .map_err(dependency)?;

    row_json(row, "row").ok_or_else(|| not_found("Owner"))
}

pub async fn get_owner(pool: &PgPool, owner_id: &str) -> AppResult<Option<Value>> {
    if !is_uuid(owner_id) {
        return Ok(None);
    }
    let row = sqlx::query("SELECT row_to_json(t) AS row FROM owners t WHERE t.id = $1::uuid")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(dependency)?;
    Ok(row_json(row, "row"))
}

pub async fn assert_building_owner(
    pool: &PgPool,
    owner_id: &str,
    building_id: &str,
) -> AppResult<Value> {
    if !is_uuid(building_id) {
        return Err(not_found("Building"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM buildings t
         WHERE t.id = $1::uuid AND t.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(building_id.trim())
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(dependency)?;

    row_json(row, "row").ok_or_else(|| not_found("Building"))
}

/// Flat plus its building, scoped through the building's owner.
pub async fn assert_flat_owner(
    pool: &PgPool,
    owner_id: &str,
    flat_id: &str,
) -> AppResult<(Value, Value)> {
    if !is_uuid(flat_id) {
        return Err(not_found("Flat"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(f) AS flat, row_to_json(b) AS building
         FROM flats f
         JOIN buildings b ON b.id = f.building_id
         WHERE f.id = $1::uuid AND b.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(flat_id.trim())
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(dependency)?;

    let Some(row) = row else {
        return Err(not_found("Flat"));
    };
    let flat = row
        .try_get::<Option<Value>, _>("flat")
        .ok()
        .flatten()
        .ok_or_else(|| not_found("Flat"))?;
    let building = row
        .try_get::<Option<Value>, _>("building")
        .ok()
        .flatten()
        .ok_or_else(|| not_found("Flat"))?;
    Ok((flat, building))
}

pub async fn assert_tenant_owner(
    pool: &PgPool,
    owner_id: &str,
    tenant_id: &str,
) -> AppResult<Value> {
    if !is_uuid(tenant_id) {
        return Err(not_found("Tenant"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM tenants t
         WHERE t.id = $1::uuid AND t.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(tenant_id.trim())
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(dependency)?;

    row_json(row, "row").ok_or_else(|| not_found("Tenant"))
}

/// Bill plus its tenant, scoped through the tenant's owner.
pub async fn assert_bill_owner(
    pool: &PgPool,
    owner_id: &str,
    bill_id: &str,
) -> AppResult<(Value, Value)> {
    if !is_uuid(bill_id) {
        return Err(not_found("Bill"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(b) AS bill, row_to_json(t) AS tenant
         FROM bills b
         JOIN tenants t ON t.id = b.tenant_id
         WHERE b.id = $1::uuid AND t.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(bill_id.trim())
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(dependency)?;

    let Some(row) = row else {
        return Err(not_found("Bill"));
    };
    let bill = row
        .try_get::<Option<Value>, _>("bill")
        .ok()
        .flatten()
        .ok_or_else(|| not_found("Bill"))?;
    let tenant = row
        .try_get::<Option<Value>, _>("tenant")
        .ok()
        .flatten()
        .ok_or_else(|| not_found("Bill"))?;
    Ok((bill, tenant))
}

/// Document scoped through the tenant it is attached to.
pub async fn assert_document_owner(
    pool: &PgPool,
    owner_id: &str,
    document_id: &str,
) -> AppResult<Value> {
    if !is_uuid(document_id) {
        return Err(not_found("Document"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(d) AS row
         FROM documents d
         JOIN tenants t ON t.id = d.tenant_id
         WHERE d.id = $1::uuid AND t.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(document_id.trim())
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(dependency)?;

    row_json(row, "row").ok_or_else(|| not_found("Document"))
}

fn resolve_full_name(user: &SupabaseUser) -> String {
    let metadata = user
        .user_metadata
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let from_metadata = ["full_name", "name", "fullName"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(value) = from_metadata {
        return value;
    }

    user.email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "Owner".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{not_found, resolve_full_name};
    use crate::{auth::SupabaseUser, error::AppError};

    fn user(email: Option<&str>, metadata: Option<serde_json::Value>) -> SupabaseUser {
        SupabaseUser {
            id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            email: email.map(ToOwned::to_owned),
            user_metadata: metadata,
        }
    }

    #[test]
    fn prefers_metadata_name_then_email_local_part() {
        assert_eq!(
            resolve_full_name(&user(
                Some("ravi@example.com"),
                Some(json!({"full_name": " Ravi Kumar "}))
            )),
            "Ravi Kumar"
        );
        assert_eq!(
            resolve_full_name(&user(Some("ravi@example.com"), Some(json!({"name": ""})))),
            "ravi"
        );
        assert_eq!(resolve_full_name(&user(None, None)), "Owner");
    }

    #[test]
    fn missing_and_foreign_rows_share_one_message() {
        match not_found("Bill") {
            AppError::NotFound(message) => {
                assert_eq!(message, "Bill not found or not authorized.")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
