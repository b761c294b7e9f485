use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::AppResult,
    schemas::{
        clamp_limit_in_range, BillPath, BillsQuery, BulkCreateBillsInput, CreateBillInput,
        DeleteBillsInput, RecordPaymentInput, UpdateBillStatusInput,
    },
    services::{
        bill_ledger::{
            bulk_create_bills, create_bill, delete_bills, invoice_document, list_bills,
            record_payment, set_bill_status,
        },
        billing::BillStatus,
        invoice_share::{share_bundle, ShareKind},
    },
    state::AppState,
    tenancy::{assert_bill_owner, get_owner},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/bills", axum::routing::get(list).post(create))
        .route("/bills/bulk", axum::routing::post(create_bulk))
        .route("/bills/delete", axum::routing::post(delete_many))
        .route("/bills/{bill_id}", axum::routing::get(get_bill))
        .route(
            "/bills/{bill_id}/status",
            axum::routing::patch(update_status),
        )
        .route("/bills/{bill_id}/mark-paid", axum::routing::post(mark_paid))
        .route(
            "/bills/{bill_id}/payments",
            axum::routing::post(add_payment),
        )
        .route("/bills/{bill_id}/invoice", axum::routing::get(invoice))
        .route("/bills/{bill_id}/share", axum::routing::get(share_invoice))
        .route(
            "/bills/{bill_id}/reminder",
            axum::routing::get(share_reminder),
        )
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let limit = clamp_limit_in_range(query.limit, 1, 1000);
    let rows = list_bills(&state, &user_id, &query, limit).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBillInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let bill = create_bill(
        pool,
        &user_id,
        &payload,
        state.config.default_electricity_rate,
    )
    .await?;
    state.invalidate_bill_lists(&user_id).await;

    Ok((StatusCode::CREATED, Json(bill)))
}

async fn create_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BulkCreateBillsInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let bills = bulk_create_bills(
        pool,
        &user_id,
        &payload.bills,
        state.config.default_electricity_rate,
    )
    .await?;
    state.invalidate_bill_lists(&user_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "count": bills.len(), "data": bills })),
    ))
}

async fn delete_many(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DeleteBillsInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    if payload.bill_ids.is_empty() {
        return Ok(Json(json!({ "deleted": 0 })));
    }
    let pool = state.db_pool()?;

    let deleted = delete_bills(pool, &user_id, &payload.bill_ids).await?;
    state.invalidate_bill_lists(&user_id).await;

    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let (mut bill, tenant) = assert_bill_owner(pool, &user_id, &path.bill_id).await?;

    if let Some(object) = bill.as_object_mut() {
        object.insert("tenant".to_string(), tenant);
    }
    Ok(Json(bill))
}

async fn update_status(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBillStatusInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let status = BillStatus::parse(&payload.status)?;
    let pool = state.db_pool()?;

    let bill = set_bill_status(pool, &user_id, &path.bill_id, status).await?;
    state.invalidate_bill_lists(&user_id).await;
    Ok(Json(bill))
}

async fn mark_paid(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let bill = set_bill_status(pool, &user_id, &path.bill_id, BillStatus::Paid).await?;
    state.invalidate_bill_lists(&user_id).await;
    Ok(Json(bill))
}

async fn add_payment(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;

    let bill = record_payment(pool, &user_id, &path.bill_id, payload.amount.as_ref()).await?;
    state.invalidate_bill_lists(&user_id).await;
    Ok(Json(bill))
}

async fn invoice(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let (bill, tenant) = assert_bill_owner(pool, &user_id, &path.bill_id).await?;

    let document = invoice_document(pool, &user_id, bill, tenant).await?;
    Ok(Json(document))
}

async fn share_invoice(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    share(state, path, headers, ShareKind::Invoice).await
}

async fn share_reminder(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    share(state, path, headers, ShareKind::Reminder).await
}

async fn share(
    state: AppState,
    path: BillPath,
    headers: HeaderMap,
    kind: ShareKind,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = state.db_pool()?;
    let (bill, tenant) = assert_bill_owner(pool, &user_id, &path.bill_id).await?;
    let owner = get_owner(pool, &user_id).await?;

    let bundle = share_bundle(
        kind,
        &bill,
        &tenant,
        owner.as_ref(),
        &state.config.upi_link_scheme,
        &state.config.payment_currency,
    );
    Ok(Json(json!(bundle)))
}
