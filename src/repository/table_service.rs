use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &["bills", "buildings", "documents", "flats", "owners", "tenants"];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    if ascending {
        query.push(" ASC");
    } else {
        query.push(" DESC");
    }
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = insert_query(table, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

/// Same as `create_row` but executes within an existing transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = insert_query(table, payload)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let mut query = update_query(table, row_id, payload, id_field)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

/// Same as `update_row` but executes within an existing transaction. Zero
/// matched rows is `NotFound`, never a silent no-op.
pub async fn update_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = update_query(table, row_id, payload, "id")?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;

    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

// jsonb_populate_record lets PostgreSQL resolve column types (uuid, numeric,
// date, boolean) from the table definition.
fn insert_query<'a>(
    table: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");
    Ok(query)
}

fn update_query<'a>(
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.push(" RETURNING row_to_json(t) AS row");
    Ok(query)
}

fn sorted_columns(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_id_filter(query: &mut QueryBuilder<Postgres>, id_name: &str, row_id: &str) {
    push_scalar_filter(
        query,
        id_name,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    if trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
}

#[derive(Debug, Clone)]
enum ArrayFilter {
    Text(Vec<String>),
    Uuid(Vec<uuid::Uuid>),
}

impl ArrayFilter {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.is_empty(),
            Self::Uuid(values) => values.is_empty(),
        }
    }
}

/// `column` or `column__in`. Any other `__` stays part of the column name.
fn parse_filter_key(filter_key: &str) -> Result<&str, AppError> {
    let column = filter_key
        .strip_suffix("__in")
        .filter(|candidate| !candidate.is_empty())
        .unwrap_or(filter_key);
    validate_identifier(column)
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let column = parse_filter_key(filter_key)?;

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            let filter = infer_array_filter(column, items);
            if filter.is_empty() {
                // An empty IN-list matches nothing.
                query.push(" AND FALSE");
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ScalarFilter) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
    }
}

fn push_array_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ArrayFilter) {
    query.push("t.").push(column);
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        ArrayFilter::Uuid(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::String(text) => {
            if is_uuid_identifier(filter_key) {
                if let Ok(parsed) = uuid::Uuid::parse_str(text.trim()) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn infer_array_filter(filter_key: &str, values: &[Value]) -> ArrayFilter {
    if is_uuid_identifier(filter_key) {
        let parsed = values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .and_then(|text| uuid::Uuid::parse_str(text.trim()).ok())
            })
            .collect::<Option<Vec<_>>>();
        if let Some(parsed) = parsed {
            return ArrayFilter::Uuid(parsed);
        }
    }

    ArrayFilter::Text(values.iter().map(render_scalar).collect::<Vec<_>>())
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

pub fn map_db_error(error: sqlx::Error) -> AppError {
    let code = error
        .as_database_error()
        .and_then(|db_error| db_error.code().map(|code| code.into_owned()));
    tracing::error!(db_error = %error, code = ?code, "Database query failed");

    match code.as_deref() {
        Some("23505") => {
            AppError::Conflict("Duplicate value violates a unique constraint.".to_string())
        }
        Some("23503") => {
            AppError::BadRequest("Referenced record does not exist.".to_string())
        }
        Some("22P02") => AppError::BadRequest("Malformed identifier or value.".to_string()),
        _ => AppError::Dependency("Database operation failed.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{insert_query, parse_filter_key, push_filter_clause, update_query};
    use crate::error::AppError;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object payload")
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let query = insert_query(
            "bills",
            &payload(json!({
                "tenant_id": "550e8400-e29b-41d4-a716-446655440000",
                "billing_month": "2026-03",
                "total_amount": 9200.0
            })),
        )
        .expect("valid insert");

        let sql = query.sql();
        assert!(
            sql.starts_with("INSERT INTO bills (billing_month, tenant_id, total_amount)"),
            "unexpected SQL: {sql}"
        );
        assert!(sql.contains("SELECT r.billing_month, r.tenant_id, r.total_amount"));
        assert!(sql.contains("jsonb_populate_record(NULL::bills"));
        assert!(sql.ends_with("RETURNING row_to_json(bills.*) AS row"));
    }

    #[test]
    fn update_sql_sets_columns_from_record_and_filters_by_id() {
        let query = update_query(
            "bills",
            "550e8400-e29b-41d4-a716-446655440000",
            &payload(json!({"status": "Paid", "is_paid": true})),
            "id",
        )
        .expect("valid update");

        let sql = query.sql();
        assert!(sql.contains("SET is_paid = r.is_paid, status = r.status"));
        assert!(sql.contains("WHERE t.id = $2"), "unexpected SQL: {sql}");
    }

    #[test]
    fn rejects_unknown_tables_and_bad_columns() {
        assert!(matches!(
            insert_query("leases", &payload(json!({"a": 1}))),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            insert_query("bills", &payload(json!({"Robert'); DROP": 1}))),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            update_query("bills", "x", &Map::new(), "id"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn parses_in_suffix_only() {
        assert_eq!(parse_filter_key("building_id__in").expect("valid"), "building_id");
        assert_eq!(parse_filter_key("status").expect("valid"), "status");
        assert_eq!(parse_filter_key("flat__code").expect("valid"), "flat__code");
        assert!(matches!(
            parse_filter_key("status; DROP"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn scalar_filters_bind_by_column_kind() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM tenants t WHERE 1=1");
        push_filter_clause(
            &mut query,
            "owner_id",
            &json!("550e8400-e29b-41d4-a716-446655440000"),
        )
        .expect("valid");
        push_filter_clause(&mut query, "is_active", &json!(true)).expect("valid");
        push_filter_clause(&mut query, "name", &json!("Asha")).expect("valid");
        push_filter_clause(&mut query, "flat_id", &Value::Null).expect("valid");

        assert!(
            query
                .sql()
                .ends_with(" AND t.owner_id = $1 AND t.is_active = $2 AND t.name::text = $3"),
            "unexpected SQL: {}",
            query.sql()
        );
    }

    #[test]
    fn in_filter_binds_uuid_array() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM flats t WHERE 1=1");
        push_filter_clause(
            &mut query,
            "building_id__in",
            &json!(["550e8400-e29b-41d4-a716-446655440000"]),
        )
        .expect("valid");
        assert!(query.sql().ends_with(" AND t.building_id = ANY($1)"));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM bills t WHERE 1=1");
        push_filter_clause(&mut query, "id", &Value::Array(Vec::new())).expect("valid");
        assert!(query.sql().ends_with(" AND FALSE"));
    }
}
