//! Tenant onboarding and checkout, keeping the tenant's `is_active` flag and
//! the flat's occupancy in lock-step.
//!
//! `flats.current_tenant_id` is the single-active-tenant reference;
//! `flats.status` and `flats.is_occupied` follow it. Both multi-row
//! operations run in one transaction with the flat row locked.

use std::fmt;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{PgConnection, PgPool, Row};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row_tx, map_db_error, update_row_tx},
    schemas::{remove_nulls, serialize_to_map, CreateTenantInput},
    services::billing::parse_finite,
    tenancy::not_found,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlatOccupancy {
    Vacant,
    #[serde(alias = "Pre-booked")]
    Booked,
    Occupied,
}

impl FlatOccupancy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vacant => "Vacant",
            Self::Booked => "Booked",
            Self::Occupied => "Occupied",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vacant" => Ok(Self::Vacant),
            "booked" | "pre-booked" | "prebooked" => Ok(Self::Booked),
            "occupied" => Ok(Self::Occupied),
            _ => Err(AppError::UnprocessableEntity(format!(
                "Invalid flat status: \"{}\". Allowed: Vacant, Booked, Occupied",
                raw.trim()
            ))),
        }
    }

    pub fn is_occupied(self) -> bool {
        self == Self::Occupied
    }

    /// Reads a stored flat. Older rows only carry `is_occupied`.
    pub fn from_row(flat: &Value) -> Self {
        let object = flat.as_object();
        if let Some(status) = object
            .and_then(|obj| obj.get("status"))
            .and_then(Value::as_str)
            .and_then(|raw| Self::parse(raw).ok())
        {
            return status;
        }
        let occupied = object
            .and_then(|obj| obj.get("is_occupied"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if occupied {
            Self::Occupied
        } else {
            Self::Vacant
        }
    }
}

impl fmt::Display for FlatOccupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `status`, `is_occupied` and `current_tenant_id` always move together.
pub fn occupancy_patch(status: FlatOccupancy, current_tenant_id: Option<&str>) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    patch.insert("is_occupied".to_string(), Value::Bool(status.is_occupied()));
    patch.insert(
        "current_tenant_id".to_string(),
        current_tenant_id
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null),
    );
    patch
}

fn current_tenant_id(flat: &Value) -> Option<String> {
    flat.as_object()
        .and_then(|obj| obj.get("current_tenant_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

/// A flat that already references an active tenant cannot be onboarded.
pub fn ensure_flat_available(flat: &Value) -> AppResult<()> {
    if current_tenant_id(flat).is_some() {
        return Err(AppError::Conflict(
            "Flat already has an active tenant. Check them out first.".to_string(),
        ));
    }
    Ok(())
}

/// Owner-initiated status change on the flat card. Freeing or booking a
/// flat with an active tenant must go through checkout instead.
pub fn manual_status_patch(flat: &Value, target: FlatOccupancy) -> AppResult<Map<String, Value>> {
    let tenant = current_tenant_id(flat);
    match (target, tenant) {
        (FlatOccupancy::Occupied, tenant) => {
            Ok(occupancy_patch(FlatOccupancy::Occupied, tenant.as_deref()))
        }
        (_, Some(_)) => Err(AppError::Conflict(format!(
            "Flat has an active tenant and cannot be marked {target}. Check the tenant out first."
        ))),
        (status, None) => Ok(occupancy_patch(status, None)),
    }
}

/// Insert payload for a new tenant. The tenant starts active and owned by
/// the caller; `join_date` defaults to today in the billing timezone.
pub fn onboarding_record(
    owner_id: &str,
    input: &CreateTenantInput,
    today: NaiveDate,
) -> AppResult<Map<String, Value>> {
    let mut record = remove_nulls(serialize_to_map(input));
    record.retain(|_, value| !matches!(value, Value::String(text) if text.trim().is_empty()));

    let join_date = match input
        .join_date
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::UnprocessableEntity("join_date must be a YYYY-MM-DD date.".to_string())
        })?,
        None => today,
    };

    record.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    record.insert(
        "flat_id".to_string(),
        Value::String(input.flat_id.trim().to_string()),
    );
    record.insert("name".to_string(), Value::String(input.name.trim().to_string()));
    record.insert("phone".to_string(), Value::String(input.phone.trim().to_string()));
    record.insert("join_date".to_string(), Value::String(join_date.to_string()));
    record.insert("is_active".to_string(), Value::Bool(true));
    Ok(record)
}

/// Accepts an absent reading; a supplied one must be finite and non-negative.
pub fn parse_final_reading(value: Option<&Value>) -> AppResult<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(raw) => {
            let reading = parse_finite("final_meter_reading", Some(raw))?;
            if reading < 0.0 {
                return Err(AppError::UnprocessableEntity(
                    "final_meter_reading must be greater than or equal to zero.".to_string(),
                ));
            }
            Ok(Some(reading))
        }
    }
}

pub fn checkout_patch(final_meter_reading: Option<f64>, checkout_date: NaiveDate) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("is_active".to_string(), Value::Bool(false));
    patch.insert(
        "checkout_date".to_string(),
        Value::String(checkout_date.to_string()),
    );
    if let Some(reading) = final_meter_reading {
        patch.insert("final_meter_reading".to_string(), json!(reading));
    }
    patch
}

pub fn today_in(timezone: Tz) -> NaiveDate {
    Utc::now().with_timezone(&timezone).date_naive()
}

#[derive(Debug, Clone)]
pub struct OccupancyChange {
    pub tenant: Value,
    pub flat: Option<Value>,
}

/// Inserts the tenant and marks the flat occupied in one transaction.
/// Rejected with `Conflict` when the flat already has an active tenant.
pub async fn onboard_tenant(
    pool: &PgPool,
    owner_id: &str,
    input: &CreateTenantInput,
    timezone: Tz,
) -> AppResult<OccupancyChange> {
    let record = onboarding_record(owner_id, input, today_in(timezone))?;
    let flat_id = input.flat_id.trim();

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let flat = lock_owned_flat(&mut tx, owner_id, flat_id).await?;
    ensure_flat_available(&flat)?;
    if has_active_tenant(&mut tx, flat_id).await? {
        return Err(AppError::Conflict(
            "Flat already has an active tenant. Check them out first.".to_string(),
        ));
    }

    let tenant = create_row_tx(&mut tx, "tenants", &record).await?;
    let tenant_id = value_str(&tenant, "id");
    let flat = update_row_tx(
        &mut tx,
        "flats",
        flat_id,
        &occupancy_patch(FlatOccupancy::Occupied, Some(&tenant_id)),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, tenant_id = %tenant_id, flat_id, "Tenant onboarded");
    Ok(OccupancyChange {
        tenant,
        flat: Some(flat),
    })
}

/// Deactivates the tenant and frees their flat in one transaction.
pub async fn checkout_tenant(
    pool: &PgPool,
    owner_id: &str,
    tenant_id: &str,
    final_meter_reading: Option<f64>,
    timezone: Tz,
) -> AppResult<OccupancyChange> {
    if uuid::Uuid::try_parse(tenant_id.trim()).is_err() {
        return Err(not_found("Tenant"));
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM tenants t
         WHERE t.id = $1::uuid AND t.owner_id = $2::uuid
         FOR UPDATE",
    )
    .bind(tenant_id.trim())
    .bind(owner_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?;
    let tenant = row
        .and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| not_found("Tenant"))?;

    let is_active = tenant
        .get("is_active")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_active {
        return Err(AppError::Conflict(
            "Tenant has already checked out.".to_string(),
        ));
    }

    let updated_tenant = update_row_tx(
        &mut tx,
        "tenants",
        tenant_id.trim(),
        &checkout_patch(final_meter_reading, today_in(timezone)),
    )
    .await?;

    let flat_id = value_str(&tenant, "flat_id");
    let mut flat = None;
    if !flat_id.is_empty() {
        let locked = lock_owned_flat(&mut tx, owner_id, &flat_id).await?;
        match current_tenant_id(&locked) {
            Some(other) if other != tenant_id.trim() => {
                tracing::warn!(
                    flat_id = %flat_id,
                    current_tenant_id = %other,
                    "Flat references a different tenant; leaving occupancy unchanged"
                );
            }
            _ => {
                flat = Some(
                    update_row_tx(
                        &mut tx,
                        "flats",
                        &flat_id,
                        &occupancy_patch(FlatOccupancy::Vacant, None),
                    )
                    .await?,
                );
            }
        }
    }

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, tenant_id, flat_id = %flat_id, "Tenant checked out");
    Ok(OccupancyChange {
        tenant: updated_tenant,
        flat,
    })
}

/// Manual status change, checked against the locked flat row and any
/// legacy active tenant.
pub async fn set_flat_status(
    pool: &PgPool,
    owner_id: &str,
    flat_id: &str,
    target: FlatOccupancy,
) -> AppResult<Value> {
    let flat_id = flat_id.trim();
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let flat = lock_owned_flat(&mut tx, owner_id, flat_id).await?;
    let previous = FlatOccupancy::from_row(&flat);
    let patch = manual_status_patch(&flat, target)?;
    if !target.is_occupied() && has_active_tenant(&mut tx, flat_id).await? {
        return Err(AppError::Conflict(format!(
            "Flat has an active tenant and cannot be marked {target}. Check the tenant out first."
        )));
    }
    let updated = update_row_tx(&mut tx, "flats", flat_id, &patch).await?;

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(owner_id, flat_id, from = %previous, to = %target, "Flat status updated");
    Ok(updated)
}

/// Locks the flat row; flats of other owners look missing.
async fn lock_owned_flat(
    conn: &mut PgConnection,
    owner_id: &str,
    flat_id: &str,
) -> AppResult<Value> {
    if uuid::Uuid::try_parse(flat_id).is_err() {
        return Err(not_found("Flat"));
    }
    let row = sqlx::query(
        "SELECT row_to_json(f) AS row
         FROM flats f
         JOIN buildings b ON b.id = f.building_id
         WHERE f.id = $1::uuid AND b.owner_id = $2::uuid
         FOR UPDATE OF f",
    )
    .bind(flat_id)
    .bind(owner_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| not_found("Flat"))
}

// Legacy rows predate current_tenant_id.
async fn has_active_tenant(conn: &mut PgConnection, flat_id: &str) -> AppResult<bool> {
    let row = sqlx::query(
        "SELECT EXISTS(
            SELECT 1 FROM tenants WHERE flat_id = $1::uuid AND is_active
         ) AS taken",
    )
    .bind(flat_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(row.try_get::<bool, _>("taken").unwrap_or(false))
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

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};

    use super::{
        checkout_patch, ensure_flat_available, manual_status_patch, occupancy_patch,
        onboarding_record, parse_final_reading, FlatOccupancy,
    };
    use crate::{error::AppError, schemas::CreateTenantInput};

    const OWNER: &str = "11111111-1111-4111-8111-111111111111";
    const FLAT: &str = "22222222-2222-4222-8222-222222222222";
    const TENANT: &str = "33333333-3333-4333-8333-333333333333";

    fn apply(row: &mut Value, patch: &Map<String, Value>) {
        if let Some(object) = row.as_object_mut() {
            for (key, value) in patch {
                object.insert(key.clone(), value.clone());
            }
        }
    }

    fn tenant_input() -> CreateTenantInput {
        serde_json::from_value(json!({
            "flat_id": FLAT,
            "name": " Asha Verma ",
            "phone": "9876543210",
            "email": "",
            "security_deposit": 18000.0,
            "initial_meter_reading": 120.0
        }))
        .expect("deserializable")
    }

    fn march_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).expect("date")
    }

    #[test]
    fn onboarding_then_checkout_keeps_lock_step() {
        let mut flat = json!({
            "id": FLAT,
            "status": "Vacant",
            "is_occupied": false,
            "current_tenant_id": null
        });
        ensure_flat_available(&flat).expect("vacant flat");

        let record = onboarding_record(OWNER, &tenant_input(), march_first()).expect("valid");
        let mut tenant = Value::Object(record);
        apply(&mut tenant, &Map::from_iter([("id".to_string(), json!(TENANT))]));
        apply(&mut flat, &occupancy_patch(FlatOccupancy::Occupied, Some(TENANT)));

        assert_eq!(tenant["is_active"], json!(true));
        assert_eq!(tenant["owner_id"], json!(OWNER));
        assert_eq!(FlatOccupancy::from_row(&flat), FlatOccupancy::Occupied);
        assert_eq!(flat["is_occupied"], json!(true));
        assert_eq!(flat["current_tenant_id"], json!(TENANT));

        let checkout_day = NaiveDate::from_ymd_opt(2026, 9, 30).expect("date");
        apply(&mut tenant, &checkout_patch(Some(1450.0), checkout_day));
        apply(&mut flat, &occupancy_patch(FlatOccupancy::Vacant, None));

        assert_eq!(tenant["is_active"], json!(false));
        assert_eq!(tenant["checkout_date"], json!("2026-09-30"));
        assert_eq!(tenant["final_meter_reading"], json!(1450.0));
        assert_eq!(FlatOccupancy::from_row(&flat), FlatOccupancy::Vacant);
        assert_eq!(flat["is_occupied"], json!(false));
        assert_eq!(flat["current_tenant_id"], Value::Null);
    }

    #[test]
    fn occupied_flat_rejects_second_tenant() {
        let flat = json!({"status": "Occupied", "current_tenant_id": TENANT});
        assert!(matches!(
            ensure_flat_available(&flat),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn onboarding_record_trims_and_defaults() {
        let record = onboarding_record(OWNER, &tenant_input(), march_first()).expect("valid");
        assert_eq!(record.get("name"), Some(&json!("Asha Verma")));
        assert_eq!(record.get("join_date"), Some(&json!("2026-03-01")));
        assert!(!record.contains_key("email"));

        let mut bad_date = tenant_input();
        bad_date.join_date = Some("01/03/2026".to_string());
        assert!(onboarding_record(OWNER, &bad_date, march_first()).is_err());
    }

    #[test]
    fn final_reading_is_optional_but_must_be_sane() {
        assert_eq!(parse_final_reading(None).expect("absent"), None);
        assert_eq!(parse_final_reading(Some(&json!(""))).expect("blank"), None);
        assert_eq!(
            parse_final_reading(Some(&json!("1450.5"))).expect("numeric"),
            Some(1450.5)
        );
        assert!(parse_final_reading(Some(&json!(-1))).is_err());
        assert!(parse_final_reading(Some(&json!("abc"))).is_err());

        let patch = checkout_patch(None, march_first());
        assert!(!patch.contains_key("final_meter_reading"));
    }

    #[test]
    fn manual_status_respects_active_tenant() {
        let occupied = json!({"status": "Occupied", "current_tenant_id": TENANT});
        assert!(matches!(
            manual_status_patch(&occupied, FlatOccupancy::Vacant),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            manual_status_patch(&occupied, FlatOccupancy::Booked),
            Err(AppError::Conflict(_))
        ));

        let vacant = json!({"status": "Vacant", "current_tenant_id": null});
        let booked = manual_status_patch(&vacant, FlatOccupancy::Booked).expect("allowed");
        assert_eq!(booked.get("status"), Some(&json!("Booked")));
        assert_eq!(booked.get("is_occupied"), Some(&json!(false)));

        let marked = manual_status_patch(&vacant, FlatOccupancy::Occupied).expect("allowed");
        assert_eq!(marked.get("is_occupied"), Some(&json!(true)));
        assert_eq!(marked.get("current_tenant_id"), Some(&Value::Null));
    }

    #[test]
    fn parses_flat_statuses_and_legacy_rows() {
        assert_eq!(FlatOccupancy::parse("Pre-booked").expect("valid"), FlatOccupancy::Booked);
        assert_eq!(FlatOccupancy::parse("occupied").expect("valid"), FlatOccupancy::Occupied);
        assert!(FlatOccupancy::parse("Demolished").is_err());
        assert_eq!(
            FlatOccupancy::from_row(&json!({"is_occupied": true})),
            FlatOccupancy::Occupied
        );
        assert_eq!(FlatOccupancy::from_row(&json!({})), FlatOccupancy::Vacant);
    }
}
