use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

fn default_limit_200() -> i64 {
    200
}
fn default_limit_500() -> i64 {
    500
}
fn default_false() -> bool {
    false
}

// Owners

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateOwnerInput {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub preferred_lang: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 255))]
    pub upi_id: Option<String>,
    pub profile_url: Option<String>,
    pub upi_qr_url: Option<String>,
    #[serde(default = "default_false")]
    pub clear_profile_url: bool,
    #[serde(default = "default_false")]
    pub clear_upi_qr_url: bool,
}

// Buildings

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBuildingInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(range(min = 0.0))]
    pub electricity_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateBuildingInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(range(min = 0.0))]
    pub electricity_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BuildingPath {
    pub building_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BuildingsQuery {
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

// Flats

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateFlatInput {
    pub building_id: String,
    #[validate(length(min = 1, max = 50))]
    pub flat_code: String,
    #[validate(range(min = -5, max = 200))]
    pub floor: Option<i32>,
    #[validate(range(min = 0.0))]
    pub rent_amount: f64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FlatsQuery {
    pub building_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FlatPath {
    pub flat_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateFlatStatusInput {
    pub status: String,
}

// Tenants

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTenantInput {
    pub flat_id: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub join_date: Option<String>,
    #[validate(range(min = 0.0))]
    pub security_deposit: Option<f64>,
    #[validate(range(min = 0.0))]
    pub initial_meter_reading: Option<f64>,
    #[validate(length(max = 64))]
    pub meter_number: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub emergency_contact: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub employment_status: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub occupancy_count: Option<i32>,
    pub profile_url: Option<String>,
}

/// Profile edits only; occupancy changes go through onboarding/checkout.
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateTenantInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub join_date: Option<String>,
    #[validate(range(min = 0.0))]
    pub security_deposit: Option<f64>,
    #[validate(range(min = 0.0))]
    pub initial_meter_reading: Option<f64>,
    #[validate(length(max = 64))]
    pub meter_number: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 255))]
    pub emergency_contact: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub employment_status: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub occupancy_count: Option<i32>,
    pub profile_url: Option<String>,
    #[serde(default = "default_false", skip_serializing)]
    pub clear_profile_url: bool,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantsQuery {
    pub active: Option<bool>,
    pub flat_id: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct CheckoutTenantInput {
    pub final_meter_reading: Option<Value>,
}

// Bills

/// Loosely typed on purpose: readings arrive as numbers or numeric strings
/// and are checked by `services::billing::validate_bill_input`.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct CreateBillInput {
    pub tenant_id: Option<String>,
    pub billing_month: Option<String>,
    pub billing_start_date: Option<String>,
    pub billing_end_date: Option<String>,
    pub previous_reading: Option<Value>,
    pub current_reading: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BulkCreateBillsInput {
    #[serde(default)]
    pub bills: Vec<CreateBillInput>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BillsQuery {
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub billing_month: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BillPath {
    pub bill_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateBillStatusInput {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RecordPaymentInput {
    pub amount: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DeleteBillsInput {
    #[serde(default)]
    pub bill_ids: Vec<String>,
}

// Documents

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateDocumentInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(url)]
    pub file_url: String,
    #[validate(length(max = 100))]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentPath {
    pub document_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        remove_nulls, serialize_to_map, validate_input, BillsQuery, CreateBuildingInput,
        CreateFlatInput, CreateTenantInput,
    };

    #[test]
    fn strips_nulls_from_serialized_inputs() {
        let input = CreateBuildingInput {
            name: "Shanti Niwas".to_string(),
            address: None,
            electricity_rate: Some(8.0),
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.get("name"), Some(&json!("Shanti Niwas")));
        assert!(!map.contains_key("address"));
    }

    #[test]
    fn rejects_negative_rates_and_rents() {
        let building = CreateBuildingInput {
            name: "Shanti Niwas".to_string(),
            address: None,
            electricity_rate: Some(-1.0),
        };
        assert!(validate_input(&building).is_err());

        let flat = CreateFlatInput {
            building_id: "b".to_string(),
            flat_code: "A-101".to_string(),
            floor: Some(1),
            rent_amount: -10.0,
        };
        assert!(validate_input(&flat).is_err());
    }

    #[test]
    fn tenant_requires_name_and_phone() {
        let tenant: CreateTenantInput = serde_json::from_value(json!({
            "flat_id": "f",
            "name": "",
            "phone": "9876543210"
        }))
        .expect("deserializable");
        assert!(validate_input(&tenant).is_err());
    }

    #[test]
    fn bill_query_defaults_limit() {
        let query: BillsQuery = serde_json::from_value(json!({})).expect("deserializable");
        assert_eq!(query.limit, 500);
        assert!(query.status.is_none());
    }
}
