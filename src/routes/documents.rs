use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::AppResult,
    repository::table_service::{create_row, delete_row, list_rows},
    schemas::{validate_input, CreateDocumentInput, DocumentPath, TenantPath},
    state::AppState,
    tenancy::{assert_document_owner, assert_tenant_owner},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants/{tenant_id}/documents",
            axum::routing::get(list_documents).post(create_document),
        )
        .route(
            "/documents/{document_id}",
            axum::routing::delete(delete_document),
        )
}

async fn list_documents(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    assert_tenant_owner(pool, &user_id, &path.tenant_id).await?;

    let mut filters = Map::new();
    filters.insert(
        "tenant_id".to_string(),
        Value::String(path.tenant_id.trim().to_string()),
    );
    let rows = list_rows(pool, "documents", Some(&filters), 200, 0, "created_at", false).await?;
    Ok(Json(json!({ "data": rows })))
}

/// Stores the reference only; the file itself lives in object storage.
async fn create_document(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
    Json(payload): Json<CreateDocumentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    assert_tenant_owner(pool, &user_id, &path.tenant_id).await?;

    let mut record = Map::new();
    record.insert(
        "tenant_id".to_string(),
        Value::String(path.tenant_id.trim().to_string()),
    );
    record.insert(
        "name".to_string(),
        Value::String(payload.name.trim().to_string()),
    );
    record.insert(
        "file_url".to_string(),
        Value::String(payload.file_url.trim().to_string()),
    );
    if let Some(file_type) = payload
        .file_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        record.insert("file_type".to_string(), Value::String(file_type.to_string()));
    }

    let created = create_row(pool, "documents", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    assert_document_owner(pool, &user_id, &path.document_id).await?;

    let deleted = delete_row(pool, "documents", path.document_id.trim(), "id").await?;
    tracing::info!(owner_id = %user_id, document_id = %path.document_id, "Document deleted");
    Ok(Json(deleted))
}
