//! Bill persistence. Amounts are always computed server-side from the
//! tenant's flat and building; every write is scoped to the calling owner.

use std::collections::HashMap;

use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row_tx, map_db_error, update_row_tx},
    schemas::{BillsQuery, CreateBillInput},
    services::billing::{
        number_field, outstanding_amount, parse_finite, payment_outcome, payment_patch,
        resolve_electricity_rate, validate_bill_batch, validate_bill_input,
        validate_payment_amount, BillDraft, BillStatus,
    },
    state::AppState,
    tenancy::{get_owner, not_found},
};

/// Rent and electricity rate in effect for one tenant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingContext {
    pub rent_amount: f64,
    pub electricity_rate: f64,
}

pub async fn resolve_billing_context(
    conn: &mut PgConnection,
    owner_id: &str,
    tenant_id: &str,
    default_rate: f64,
) -> AppResult<BillingContext> {
    let row = sqlx::query(
        "SELECT f.id IS NOT NULL AS has_flat,
                f.rent_amount::float8 AS rent_amount,
                b.electricity_rate::float8 AS electricity_rate
         FROM tenants t
         LEFT JOIN flats f ON f.id = t.flat_id
         LEFT JOIN buildings b ON b.id = f.building_id
         WHERE t.id = $1::uuid AND t.owner_id = $2::uuid
         LIMIT 1",
    )
    .bind(tenant_id)
    .bind(owner_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| not_found("Tenant"))?;

    if !row.try_get::<bool, _>("has_flat").unwrap_or(false) {
        return Err(AppError::UnprocessableEntity(
            "Tenant has no flat assigned; cannot compute rent.".to_string(),
        ));
    }

    let rent_amount = row
        .try_get::<Option<f64>, _>("rent_amount")
        .ok()
        .flatten()
        .unwrap_or(0.0);
    let building_rate = row
        .try_get::<Option<f64>, _>("electricity_rate")
        .ok()
        .flatten();

    Ok(BillingContext {
        rent_amount,
        electricity_rate: resolve_electricity_rate(building_rate, default_rate),
    })
}

fn bill_record(draft: &BillDraft, context: &BillingContext) -> serde_json::Map<String, Value> {
    if draft.has_negative_consumption() {
        tracing::warn!(
            tenant_id = %draft.tenant_id,
            billing_month = %draft.billing_month,
            previous_reading = draft.previous_reading,
            current_reading = draft.current_reading,
            "Current reading below previous reading; units clamped to zero"
        );
    }
    let amounts = draft.amounts(context.electricity_rate, context.rent_amount);
    draft.to_record(&amounts)
}

pub async fn create_bill(
    pool: &PgPool,
    owner_id: &str,
    input: &CreateBillInput,
    default_rate: f64,
) -> AppResult<Value> {
    let draft = validate_bill_input(input)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let context = resolve_billing_context(&mut tx, owner_id, &draft.tenant_id, default_rate).await?;
    let bill = create_row_tx(&mut tx, "bills", &bill_record(&draft, &context)).await?;

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(
        owner_id,
        tenant_id = %draft.tenant_id,
        billing_month = %draft.billing_month,
        "Bill created"
    );
    Ok(bill)
}

/// Validates and resolves every entry before inserting any; one transaction
/// covers the whole batch.
pub async fn bulk_create_bills(
    pool: &PgPool,
    owner_id: &str,
    inputs: &[CreateBillInput],
    default_rate: f64,
) -> AppResult<Vec<Value>> {
    let drafts = validate_bill_batch(inputs)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let mut contexts: HashMap<String, BillingContext> = HashMap::new();
    let mut records = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.iter().enumerate() {
        let context = match contexts.get(&draft.tenant_id) {
            Some(context) => *context,
            None => {
                let context =
                    resolve_billing_context(&mut tx, owner_id, &draft.tenant_id, default_rate)
                        .await
                        .map_err(|error| prefix_error(index, error))?;
                contexts.insert(draft.tenant_id.clone(), context);
                context
            }
        };
        records.push(bill_record(draft, &context));
    }

    let mut created = Vec::with_capacity(records.len());
    for record in &records {
        created.push(create_row_tx(&mut tx, "bills", record).await?);
    }

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, count = created.len(), "Bills created in bulk");
    Ok(created)
}

fn prefix_error(index: usize, error: AppError) -> AppError {
    let label = format!("Bill #{}", index + 1);
    match error {
        AppError::NotFound(message) => AppError::NotFound(format!("{label}: {message}")),
        AppError::UnprocessableEntity(message) => {
            AppError::UnprocessableEntity(format!("{label}: {message}"))
        }
        other => other,
    }
}

/// "Mark as": any allowed status may replace any other.
pub async fn set_bill_status(
    pool: &PgPool,
    owner_id: &str,
    bill_id: &str,
    status: BillStatus,
) -> AppResult<Value> {
    if uuid::Uuid::try_parse(bill_id.trim()).is_err() {
        return Err(not_found("Bill"));
    }

    let row = sqlx::query(
        "UPDATE bills b
         SET status = $1, is_paid = $2,
             paid_amount = CASE WHEN $5 THEN 0 ELSE b.paid_amount END
         FROM tenants t
         WHERE b.id = $3::uuid AND t.id = b.tenant_id AND t.owner_id = $4::uuid
         RETURNING row_to_json(b) AS row",
    )
    .bind(status.as_str())
    .bind(status.is_paid())
    .bind(bill_id.trim())
    .bind(owner_id)
    .bind(status.clears_paid_amount())
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    let bill = row
        .and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| not_found("Bill"))?;

    tracing::info!(owner_id, bill_id, status = %status, "Bill status updated");
    Ok(bill)
}

/// The submitted amount alone decides the next status and replaces
/// `paid_amount`.
pub async fn record_payment(
    pool: &PgPool,
    owner_id: &str,
    bill_id: &str,
    amount: Option<&Value>,
) -> AppResult<Value> {
    let amount = validate_payment_amount(parse_finite("amount", amount)?)?;
    if uuid::Uuid::try_parse(bill_id.trim()).is_err() {
        return Err(not_found("Bill"));
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let row = sqlx::query(
        "SELECT row_to_json(b) AS row
         FROM bills b
         JOIN tenants t ON t.id = b.tenant_id
         WHERE b.id = $1::uuid AND t.owner_id = $2::uuid
         FOR UPDATE OF b",
    )
    .bind(bill_id.trim())
    .bind(owner_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?;
    let bill = row
        .and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| not_found("Bill"))?;

    let total = number_field(&bill, "total_amount").unwrap_or(0.0);
    let status = payment_outcome(total, amount)?;
    let updated = update_row_tx(&mut tx, "bills", bill_id.trim(), &payment_patch(amount, status))
        .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, bill_id, amount, status = %status, "Payment recorded");
    Ok(updated)
}

/// Deletes all of `bill_ids` or none of them. An id the caller does not own
/// fails the whole request.
pub async fn delete_bills(pool: &PgPool, owner_id: &str, bill_ids: &[String]) -> AppResult<u64> {
    let mut ids = Vec::with_capacity(bill_ids.len());
    for raw in bill_ids {
        let id = uuid::Uuid::try_parse(raw.trim()).map_err(|_| not_found("Bill"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Ok(0);
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let owned = sqlx::query(
        "SELECT b.id
         FROM bills b
         JOIN tenants t ON t.id = b.tenant_id
         WHERE b.id = ANY($1) AND t.owner_id = $2::uuid
         FOR UPDATE OF b",
    )
    .bind(&ids)
    .bind(owner_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(map_db_error)?;

    if owned.len() != ids.len() {
        return Err(AppError::NotFound(format!(
            "{} of {} bills not found or not authorized; nothing was deleted.",
            ids.len() - owned.len(),
            ids.len()
        )));
    }

    let deleted = sqlx::query("DELETE FROM bills WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?
        .rows_affected();

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, deleted, "Bills deleted");
    Ok(deleted)
}

/// The suggested `previous_reading` for a tenant's next bill.
pub async fn last_reading(pool: &PgPool, tenant: &Value) -> AppResult<f64> {
    let tenant_id = tenant
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let row = sqlx::query(
        "SELECT current_reading::float8 AS current_reading
         FROM bills
         WHERE tenant_id = $1::uuid
         ORDER BY billing_month DESC, created_at DESC
         LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    let from_bill = row.and_then(|value| {
        value
            .try_get::<Option<f64>, _>("current_reading")
            .ok()
            .flatten()
    });
    Ok(from_bill
        .or_else(|| number_field(tenant, "initial_meter_reading"))
        .unwrap_or(0.0))
}

fn bill_list_cache_key(owner_id: &str, query: &BillsQuery, limit: i64) -> String {
    format!(
        "{owner_id}|tenant={}|status={}|month={}|limit={limit}",
        query.tenant_id.as_deref().unwrap_or_default(),
        query.status.as_deref().unwrap_or_default(),
        query.billing_month.as_deref().unwrap_or_default(),
    )
}

/// Bills of the caller, newest month first, with tenant name/phone and flat
/// code attached. Cached per owner and filter set.
pub async fn list_bills(
    state: &AppState,
    owner_id: &str,
    query: &BillsQuery,
    limit: i64,
) -> AppResult<Value> {
    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(BillStatus::parse)
        .transpose()?;
    let tenant_id = query
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(tenant_id) = tenant_id {
        if uuid::Uuid::try_parse(tenant_id).is_err() {
            return Ok(Value::Array(Vec::new()));
        }
    }

    let cache_key = bill_list_cache_key(owner_id, query, limit);
    if let Some(cached) = state.bill_list_cache.get(&cache_key).await {
        tracing::debug!(owner_id, "Bill list cache hit");
        return Ok(cached);
    }

    let pool = state.db_pool()?;
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT row_to_json(b)::jsonb || jsonb_build_object(
            'tenant', jsonb_build_object(
                'id', t.id, 'name', t.name, 'phone', t.phone, 'flat_id', t.flat_id
            ),
            'flat_code', f.flat_code
         ) AS row
         FROM bills b
         JOIN tenants t ON t.id = b.tenant_id
         LEFT JOIN flats f ON f.id = t.flat_id
         WHERE t.owner_id = ",
    );
    builder.push_bind(owner_id.to_string()).push("::uuid");
    if let Some(tenant_id) = tenant_id {
        builder
            .push(" AND b.tenant_id = ")
            .push_bind(tenant_id.to_string())
            .push("::uuid");
    }
    if let Some(status) = status {
        builder
            .push(" AND b.status = ")
            .push_bind(status.as_str().to_string());
    }
    if let Some(month) = query
        .billing_month
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        builder
            .push(" AND b.billing_month = ")
            .push_bind(month.to_string());
    }
    builder
        .push(" ORDER BY b.billing_month DESC, b.created_at DESC LIMIT ")
        .push_bind(limit);

    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    let bills = Value::Array(
        rows.into_iter()
            .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
            .collect(),
    );

    state.bill_list_cache.insert(cache_key, bills.clone()).await;
    Ok(bills)
}

/// Unpaid, non-cancelled bills of the caller, oldest first.
pub async fn unpaid_bills(pool: &PgPool, owner_id: &str) -> AppResult<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(b)::jsonb || jsonb_build_object(
            'tenant', jsonb_build_object('id', t.id, 'name', t.name, 'phone', t.phone),
            'flat_code', f.flat_code
         ) AS row
         FROM bills b
         JOIN tenants t ON t.id = b.tenant_id
         LEFT JOIN flats f ON f.id = t.flat_id
         WHERE t.owner_id = $1::uuid
           AND NOT COALESCE(b.is_paid, false)
           AND COALESCE(b.status, 'Due') <> 'Cancelled'
         ORDER BY b.billing_month ASC, b.created_at ASC
         LIMIT 1000",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect())
}

/// Everything the invoice renderer needs, numbers already resolved.
pub async fn invoice_document(
    pool: &PgPool,
    owner_id: &str,
    bill: Value,
    tenant: Value,
) -> AppResult<Value> {
    let flat_id = tenant
        .get("flat_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (flat, building) = if uuid::Uuid::try_parse(&flat_id).is_ok() {
        let row = sqlx::query(
            "SELECT row_to_json(f) AS flat, row_to_json(b) AS building
             FROM flats f
             JOIN buildings b ON b.id = f.building_id
             WHERE f.id = $1::uuid AND b.owner_id = $2::uuid
             LIMIT 1",
        )
        .bind(&flat_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
        match row {
            Some(row) => (
                row.try_get::<Option<Value>, _>("flat").ok().flatten(),
                row.try_get::<Option<Value>, _>("building").ok().flatten(),
            ),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    let owner = get_owner(pool, owner_id).await?;
    let status = BillStatus::from_row(&bill);
    let outstanding = outstanding_amount(&bill);

    Ok(json!({
        "bill": bill,
        "tenant": tenant,
        "owner": owner,
        "flat": flat,
        "building": building,
        "status": status,
        "is_paid": status.is_paid(),
        "outstanding_amount": outstanding,
    }))
}
