//! Bill arithmetic and the bill status machine.
//!
//! Everything here is pure: callers resolve tenant/flat/building context and
//! persist the returned records. `bill_ledger` is the persistence side.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    schemas::CreateBillInput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillStatus {
    Due,
    Pending,
    Partial,
    Paid,
    #[serde(rename = "Advance Paid")]
    AdvancePaid,
    Cancelled,
}

impl BillStatus {
    pub const ALL: [BillStatus; 6] = [
        BillStatus::Paid,
        BillStatus::AdvancePaid,
        BillStatus::Due,
        BillStatus::Pending,
        BillStatus::Cancelled,
        BillStatus::Partial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Due => "Due",
            Self::Pending => "Pending",
            Self::Partial => "Partial",
            Self::Paid => "Paid",
            Self::AdvancePaid => "Advance Paid",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Exact match on the display names; anything else is a validation error
    /// naming the allowed values.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let candidate = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == candidate)
            .ok_or_else(|| {
                AppError::UnprocessableEntity(format!(
                    "Invalid status: \"{candidate}\". Allowed: {}",
                    Self::allowed_list()
                ))
            })
    }

    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The single rule for the stored `is_paid` flag. "Advance Paid" counts
    /// as settled.
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Paid | Self::AdvancePaid)
    }

    /// Marking a bill back to an unsettled or cancelled status drops any
    /// recorded `paid_amount`.
    pub fn clears_paid_amount(self) -> bool {
        matches!(self, Self::Due | Self::Pending | Self::Cancelled)
    }

    /// Reads a stored row. Legacy rows carry only `is_paid`.
    pub fn from_row(row: &Value) -> Self {
        let object = row.as_object();
        let status = object
            .and_then(|obj| obj.get("status"))
            .and_then(Value::as_str)
            .and_then(|raw| Self::parse(raw).ok());
        if let Some(status) = status {
            return status;
        }
        let paid = object
            .and_then(|obj| obj.get("is_paid"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if paid {
            Self::Paid
        } else {
            Self::Due
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumed units; a reading below the previous one is clamped to zero.
pub fn compute_units(previous_reading: f64, current_reading: f64) -> f64 {
    (current_reading - previous_reading).max(0.0)
}

/// Rounds to the currency minor unit (paise).
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// A building without a usable rate (unset, zero, negative) bills at the
/// configured fallback.
pub fn resolve_electricity_rate(building_rate: Option<f64>, fallback: f64) -> f64 {
    building_rate
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .unwrap_or(fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BillAmounts {
    pub units_consumed: f64,
    pub electricity_rate: f64,
    pub electricity_amount: f64,
    pub rent_amount: f64,
    pub total_amount: f64,
}

pub fn compute_bill_amounts(
    previous_reading: f64,
    current_reading: f64,
    electricity_rate: f64,
    rent_amount: f64,
) -> BillAmounts {
    let units_consumed = compute_units(previous_reading, current_reading);
    let electricity_amount = round_currency(units_consumed * electricity_rate);
    let rent_amount = round_currency(rent_amount);
    BillAmounts {
        units_consumed,
        electricity_rate,
        electricity_amount,
        rent_amount,
        total_amount: round_currency(electricity_amount + rent_amount),
    }
}

/// A validated bill request, before tenant context is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct BillDraft {
    pub tenant_id: String,
    pub billing_month: String,
    pub billing_start_date: NaiveDate,
    pub billing_end_date: NaiveDate,
    pub previous_reading: f64,
    pub current_reading: f64,
}

impl BillDraft {
    pub fn amounts(&self, electricity_rate: f64, rent_amount: f64) -> BillAmounts {
        compute_bill_amounts(
            self.previous_reading,
            self.current_reading,
            electricity_rate,
            rent_amount,
        )
    }

    pub fn has_negative_consumption(&self) -> bool {
        self.current_reading < self.previous_reading
    }

    /// The row inserted into `bills`. New bills always start `Due`.
    pub fn to_record(&self, amounts: &BillAmounts) -> Map<String, Value> {
        let status = BillStatus::Due;
        let mut record = Map::new();
        record.insert("tenant_id".to_string(), Value::String(self.tenant_id.clone()));
        record.insert(
            "billing_month".to_string(),
            Value::String(self.billing_month.clone()),
        );
        record.insert(
            "billing_start_date".to_string(),
            Value::String(self.billing_start_date.to_string()),
        );
        record.insert(
            "billing_end_date".to_string(),
            Value::String(self.billing_end_date.to_string()),
        );
        record.insert("previous_reading".to_string(), json!(self.previous_reading));
        record.insert("current_reading".to_string(), json!(self.current_reading));
        record.insert("units_consumed".to_string(), json!(amounts.units_consumed));
        record.insert(
            "electricity_amount".to_string(),
            json!(amounts.electricity_amount),
        );
        record.insert("rent_amount".to_string(), json!(amounts.rent_amount));
        record.insert("total_amount".to_string(), json!(amounts.total_amount));
        record.insert("paid_amount".to_string(), json!(0.0));
        record.extend(status_patch(status));
        record
    }
}

pub fn validate_bill_input(input: &CreateBillInput) -> AppResult<BillDraft> {
    let tenant_id = required_text("tenant_id", input.tenant_id.as_deref())?;
    if uuid::Uuid::try_parse(&tenant_id).is_err() {
        return Err(AppError::UnprocessableEntity(
            "tenant_id must be a valid UUID.".to_string(),
        ));
    }

    let billing_month = required_text("billing_month", input.billing_month.as_deref())?;
    let (month_start, month_end) = parse_billing_month(&billing_month)?;

    let previous_reading = parse_finite("previous_reading", input.previous_reading.as_ref())?;
    let current_reading = parse_finite("current_reading", input.current_reading.as_ref())?;
    if previous_reading < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "previous_reading must be greater than or equal to zero.".to_string(),
        ));
    }

    let billing_start_date =
        optional_date("billing_start_date", input.billing_start_date.as_deref())?
            .unwrap_or(month_start);
    let billing_end_date = optional_date("billing_end_date", input.billing_end_date.as_deref())?
        .unwrap_or(month_end);
    if billing_end_date < billing_start_date {
        return Err(AppError::UnprocessableEntity(
            "billing_end_date must not be before billing_start_date.".to_string(),
        ));
    }

    Ok(BillDraft {
        tenant_id,
        billing_month,
        billing_start_date,
        billing_end_date,
        previous_reading,
        current_reading,
    })
}

/// Validates a whole batch up front; the first invalid entry rejects all of
/// them.
pub fn validate_bill_batch(inputs: &[CreateBillInput]) -> AppResult<Vec<BillDraft>> {
    if inputs.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "No bills data provided.".to_string(),
        ));
    }

    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            validate_bill_input(input).map_err(|error| {
                AppError::UnprocessableEntity(format!("Bill #{}: {error}", index + 1))
            })
        })
        .collect()
}

/// `status` and `is_paid` are always written together.
pub fn status_patch(status: BillStatus) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    patch.insert("is_paid".to_string(), Value::Bool(status.is_paid()));
    patch
}

/// Rejected before any store access: the amount must be finite and
/// strictly positive once rounded to paise. Returns the rounded amount.
pub fn validate_payment_amount(payment_amount: f64) -> AppResult<f64> {
    if !payment_amount.is_finite() {
        return Err(AppError::UnprocessableEntity(
            "Payment amount must be a finite number.".to_string(),
        ));
    }
    if payment_amount < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Payment amount cannot be negative.".to_string(),
        ));
    }
    let payment_amount = round_currency(payment_amount);
    if payment_amount == 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Payment amount must be greater than zero.".to_string(),
        ));
    }
    Ok(payment_amount)
}

/// Next status for a payment against a bill total. Both sides are compared
/// in paise, the unit `paid_amount` is stored in.
pub fn payment_outcome(total_amount: f64, payment_amount: f64) -> AppResult<BillStatus> {
    let payment_amount = validate_payment_amount(payment_amount)?;
    if payment_amount >= round_currency(total_amount) {
        Ok(BillStatus::Paid)
    } else {
        Ok(BillStatus::Partial)
    }
}

pub fn payment_patch(payment_amount: f64, status: BillStatus) -> Map<String, Value> {
    let mut patch = status_patch(status);
    patch.insert(
        "paid_amount".to_string(),
        json!(round_currency(payment_amount)),
    );
    patch
}

/// What is still owed on a stored bill. Settled and cancelled bills owe
/// nothing.
pub fn outstanding_amount(bill: &Value) -> f64 {
    let status = BillStatus::from_row(bill);
    if status.is_paid() || status == BillStatus::Cancelled {
        return 0.0;
    }
    let total = number_field(bill, "total_amount").unwrap_or(0.0);
    let paid = if status == BillStatus::Partial {
        number_field(bill, "paid_amount").unwrap_or(0.0)
    } else {
        0.0
    };
    round_currency((total - paid).max(0.0))
}

/// `YYYY-MM` into the first and last day of that month.
pub fn parse_billing_month(raw: &str) -> AppResult<(NaiveDate, NaiveDate)> {
    let invalid = || {
        AppError::UnprocessableEntity(format!(
            "billing_month must be formatted as YYYY-MM, got \"{raw}\"."
        ))
    };

    let trimmed = raw.trim();
    if trimmed.len() != 7 {
        return Err(invalid());
    }
    let start = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .map_err(|_| invalid())?;
    let next_month = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .ok_or_else(invalid)?;
    let end = next_month.pred_opt().ok_or_else(invalid)?;
    Ok((start, end))
}

/// Accepts JSON numbers and numeric strings (form posts send strings).
pub fn parse_finite(field: &str, value: Option<&Value>) -> AppResult<f64> {
    let missing = || AppError::UnprocessableEntity(format!("{field} is required."));
    let invalid = || AppError::UnprocessableEntity(format!("{field} must be a finite number."));

    let parsed = match value {
        None | Some(Value::Null) => return Err(missing()),
        Some(Value::Number(number)) => number.as_f64().ok_or_else(invalid)?,
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(missing());
            }
            trimmed.parse::<f64>().map_err(|_| invalid())?
        }
        Some(_) => return Err(invalid()),
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(invalid())
    }
}

pub fn number_field(row: &Value, key: &str) -> Option<f64> {
    let value = row.as_object().and_then(|obj| obj.get(key))?;
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn required_text(field: &str, value: Option<&str>) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::UnprocessableEntity(format!("{field} is required.")))
}

fn optional_date(field: &str, value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    let Some(text) = value.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::UnprocessableEntity(format!("{field} must be a YYYY-MM-DD date.")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use super::{
        compute_bill_amounts, compute_units, outstanding_amount, parse_billing_month,
        parse_finite, payment_outcome, payment_patch, resolve_electricity_rate, round_currency,
        status_patch, validate_bill_batch, validate_bill_input, BillStatus,
    };
    use crate::{error::AppError, schemas::CreateBillInput};

    const TENANT: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn input(previous: Value, current: Value) -> CreateBillInput {
        CreateBillInput {
            tenant_id: Some(TENANT.to_string()),
            billing_month: Some("2026-03".to_string()),
            billing_start_date: None,
            billing_end_date: None,
            previous_reading: Some(previous),
            current_reading: Some(current),
        }
    }

    #[test]
    fn units_are_never_negative() {
        let pairs = [
            (0.0, 0.0),
            (120.0, 145.0),
            (145.0, 120.0),
            (99999.0, 3.0),
            (10.5, 10.75),
            (0.0, 1e9),
        ];
        for (previous, current) in pairs {
            let units = compute_units(previous, current);
            assert!(units >= 0.0, "negative units for {previous} -> {current}");
            assert_eq!(units, (current - previous).max(0.0));
        }
    }

    #[test]
    fn total_is_electricity_plus_rent() {
        let cases = [
            (0.0, 0.0, 8.0, 0.0),
            (120.0, 145.0, 8.0, 9000.0),
            (1000.0, 1333.3, 7.25, 12500.5),
            (10.0, 10.1, 9.99, 0.0),
            (500.0, 400.0, 8.0, 6000.0),
        ];
        for (previous, current, rate, rent) in cases {
            let amounts = compute_bill_amounts(previous, current, rate, rent);
            assert_eq!(
                amounts.total_amount,
                round_currency(amounts.electricity_amount + amounts.rent_amount)
            );
            assert!(
                (amounts.total_amount - (amounts.electricity_amount + amounts.rent_amount)).abs()
                    < 0.005
            );
        }
    }

    #[test]
    fn worked_example_from_meter_readings() {
        let amounts = compute_bill_amounts(120.0, 145.0, 8.0, 9000.0);
        assert_eq!(amounts.units_consumed, 25.0);
        assert_eq!(amounts.electricity_amount, 200.0);
        assert_eq!(amounts.rent_amount, 9000.0);
        assert_eq!(amounts.total_amount, 9200.0);
    }

    #[test]
    fn falls_back_to_default_rate() {
        assert_eq!(resolve_electricity_rate(None, 8.0), 8.0);
        assert_eq!(resolve_electricity_rate(Some(0.0), 8.0), 8.0);
        assert_eq!(resolve_electricity_rate(Some(-1.0), 8.0), 8.0);
        assert_eq!(resolve_electricity_rate(Some(f64::NAN), 8.0), 8.0);
        assert_eq!(resolve_electricity_rate(Some(9.5), 8.0), 9.5);
    }

    #[test]
    fn is_paid_derivation_is_deterministic() {
        for status in BillStatus::ALL {
            let first = status_patch(status);
            let second = status_patch(status);
            assert_eq!(first, second);
            assert_eq!(first.get("is_paid"), Some(&Value::Bool(status.is_paid())));
            assert_eq!(
                first.get("status").and_then(Value::as_str),
                Some(status.as_str())
            );
        }
        assert!(BillStatus::Paid.is_paid());
        assert!(BillStatus::AdvancePaid.is_paid());
        assert!(!BillStatus::Partial.is_paid());
        assert!(!BillStatus::Due.is_paid());
        assert!(!BillStatus::Cancelled.is_paid());
    }

    #[test]
    fn parses_statuses_and_lists_allowed_values_on_error() {
        assert_eq!(
            BillStatus::parse("Advance Paid").expect("valid"),
            BillStatus::AdvancePaid
        );
        assert_eq!(BillStatus::parse(" Due ").expect("valid"), BillStatus::Due);

        match BillStatus::parse("Settled") {
            Err(AppError::UnprocessableEntity(message)) => {
                assert!(message.contains("Settled"));
                assert!(message.contains("Paid, Advance Paid, Due, Pending, Cancelled, Partial"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn status_serializes_with_display_names() {
        assert_eq!(
            serde_json::to_value(BillStatus::AdvancePaid).expect("serializable"),
            json!("Advance Paid")
        );
        let parsed: BillStatus = serde_json::from_value(json!("Partial")).expect("valid");
        assert_eq!(parsed, BillStatus::Partial);
    }

    #[test]
    fn legacy_rows_fall_back_to_paid_flag() {
        assert_eq!(BillStatus::from_row(&json!({"is_paid": true})), BillStatus::Paid);
        assert_eq!(BillStatus::from_row(&json!({"is_paid": false})), BillStatus::Due);
        assert_eq!(BillStatus::from_row(&json!({})), BillStatus::Due);
        assert_eq!(
            BillStatus::from_row(&json!({"status": "Advance Paid", "is_paid": false})),
            BillStatus::AdvancePaid
        );
    }

    #[test]
    fn payment_drives_status() {
        assert_eq!(payment_outcome(9200.0, 9200.0).expect("valid"), BillStatus::Paid);
        assert_eq!(payment_outcome(9200.0, 10000.0).expect("valid"), BillStatus::Paid);
        assert_eq!(payment_outcome(9200.0, 5000.0).expect("valid"), BillStatus::Partial);
        assert_eq!(payment_outcome(9200.0, 0.01).expect("valid"), BillStatus::Partial);

        for rejected in [0.0, -1.0, -9200.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                payment_outcome(9200.0, rejected),
                Err(AppError::UnprocessableEntity(_))
            ));
        }
    }

    #[test]
    fn payment_patch_keeps_flag_consistent() {
        let paid = payment_patch(9200.0, payment_outcome(9200.0, 9200.0).expect("valid"));
        assert_eq!(paid.get("status").and_then(Value::as_str), Some("Paid"));
        assert_eq!(paid.get("is_paid"), Some(&Value::Bool(true)));
        assert_eq!(paid.get("paid_amount").and_then(Value::as_f64), Some(9200.0));

        let partial = payment_patch(5000.0, payment_outcome(9200.0, 5000.0).expect("valid"));
        assert_eq!(partial.get("status").and_then(Value::as_str), Some("Partial"));
        assert_eq!(partial.get("is_paid"), Some(&Value::Bool(false)));
    }

    #[test]
    fn sub_paise_payment_is_judged_as_stored() {
        let status = payment_outcome(9200.0, 9199.996).expect("valid");
        assert_eq!(status, BillStatus::Paid);

        let patch = payment_patch(9199.996, status);
        assert_eq!(patch.get("paid_amount").and_then(Value::as_f64), Some(9200.0));
        assert_eq!(patch.get("is_paid"), Some(&Value::Bool(true)));

        let stored = Value::Object(patch);
        assert_eq!(outstanding_amount(&stored), 0.0);

        assert_eq!(
            payment_outcome(9200.0, 9199.994).expect("valid"),
            BillStatus::Partial
        );
        assert!(matches!(
            payment_outcome(9200.0, 0.004),
            Err(AppError::UnprocessableEntity(_))
        ));
    }

    #[test]
    fn marking_unsettled_clears_paid_amount() {
        assert!(BillStatus::Due.clears_paid_amount());
        assert!(BillStatus::Pending.clears_paid_amount());
        assert!(BillStatus::Cancelled.clears_paid_amount());
        assert!(!BillStatus::Partial.clears_paid_amount());
        assert!(!BillStatus::Paid.clears_paid_amount());
        assert!(!BillStatus::AdvancePaid.clears_paid_amount());
    }

    #[test]
    fn outstanding_amount_respects_status() {
        assert_eq!(
            outstanding_amount(&json!({"status": "Due", "total_amount": 9200})),
            9200.0
        );
        assert_eq!(
            outstanding_amount(
                &json!({"status": "Partial", "total_amount": 9200, "paid_amount": 5000})
            ),
            4200.0
        );
        assert_eq!(
            outstanding_amount(&json!({"status": "Advance Paid", "total_amount": 9200})),
            0.0
        );
        assert_eq!(
            outstanding_amount(&json!({"status": "Cancelled", "total_amount": 9200})),
            0.0
        );
    }

    #[test]
    fn billing_month_defaults_period() {
        let (start, end) = parse_billing_month("2026-02").expect("valid");
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).expect("date"));
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 28).expect("date"));

        let (_, december_end) = parse_billing_month("2025-12").expect("valid");
        assert_eq!(december_end, NaiveDate::from_ymd_opt(2025, 12, 31).expect("date"));

        for bad in ["2026-13", "2026-2", "March", "", "2026-02-01"] {
            assert!(parse_billing_month(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn parses_numeric_strings_and_rejects_garbage() {
        assert_eq!(parse_finite("x", Some(&json!(145))).expect("number"), 145.0);
        assert_eq!(parse_finite("x", Some(&json!(" 12.5 "))).expect("string"), 12.5);
        for bad in [json!("abc"), json!("NaN"), json!("inf"), json!(true), json!([1])] {
            assert!(parse_finite("x", Some(&bad)).is_err(), "accepted {bad}");
        }
        match parse_finite("current_reading", None) {
            Err(AppError::UnprocessableEntity(message)) => {
                assert_eq!(message, "current_reading is required.")
            }
            other => panic!("expected missing-field error, got {other:?}"),
        }
        assert!(parse_finite("x", Some(&Value::Null)).is_err());
    }

    #[test]
    fn validates_single_bill_input() {
        let draft = validate_bill_input(&input(json!(120), json!("145"))).expect("valid");
        assert_eq!(draft.tenant_id, TENANT);
        assert_eq!(draft.previous_reading, 120.0);
        assert_eq!(draft.current_reading, 145.0);
        assert_eq!(
            draft.billing_start_date,
            NaiveDate::from_ymd_opt(2026, 3, 1).expect("date")
        );
        assert_eq!(
            draft.billing_end_date,
            NaiveDate::from_ymd_opt(2026, 3, 31).expect("date")
        );

        let mut missing_tenant = input(json!(1), json!(2));
        missing_tenant.tenant_id = Some("   ".to_string());
        assert!(validate_bill_input(&missing_tenant).is_err());

        let mut missing_month = input(json!(1), json!(2));
        missing_month.billing_month = None;
        assert!(validate_bill_input(&missing_month).is_err());

        let mut missing_reading = input(json!(1), json!(2));
        missing_reading.current_reading = None;
        assert!(validate_bill_input(&missing_reading).is_err());

        let mut inverted_period = input(json!(1), json!(2));
        inverted_period.billing_start_date = Some("2026-03-20".to_string());
        inverted_period.billing_end_date = Some("2026-03-01".to_string());
        assert!(validate_bill_input(&inverted_period).is_err());

        assert!(validate_bill_input(&input(json!(-5), json!(2))).is_err());
    }

    #[test]
    fn negative_consumption_is_clamped_not_rejected() {
        let draft = validate_bill_input(&input(json!(145), json!(120))).expect("valid");
        assert!(draft.has_negative_consumption());
        let amounts = draft.amounts(8.0, 9000.0);
        assert_eq!(amounts.units_consumed, 0.0);
        assert_eq!(amounts.total_amount, 9000.0);
    }

    #[test]
    fn new_bill_record_starts_due_and_unpaid() {
        let draft = validate_bill_input(&input(json!(120), json!(145))).expect("valid");
        let record = draft.to_record(&draft.amounts(8.0, 9000.0));
        assert_eq!(record.get("status").and_then(Value::as_str), Some("Due"));
        assert_eq!(record.get("is_paid"), Some(&Value::Bool(false)));
        assert_eq!(record.get("total_amount").and_then(Value::as_f64), Some(9200.0));
        assert_eq!(record.get("units_consumed").and_then(Value::as_f64), Some(25.0));
        assert_eq!(
            record.get("billing_end_date").and_then(Value::as_str),
            Some("2026-03-31")
        );
    }

    #[test]
    fn batch_with_one_invalid_entry_is_rejected_whole() {
        let mut batch = vec![
            input(json!(100), json!(110)),
            input(json!(200), json!(230)),
            input(json!(300), json!(330)),
        ];
        assert_eq!(validate_bill_batch(&batch).expect("all valid").len(), 3);

        batch[1].current_reading = Some(json!("not-a-number"));
        match validate_bill_batch(&batch) {
            Err(AppError::UnprocessableEntity(message)) => {
                assert!(message.starts_with("Bill #2:"), "got {message}")
            }
            other => panic!("expected batch rejection, got {other:?}"),
        }

        assert!(validate_bill_batch(&[]).is_err());
    }
}
