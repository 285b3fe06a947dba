use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{Duration, Utc};
use utoipa::OpenApi;

use super::{
    dto::{ConditionCheckResponse, ExpiringParams, LowStockParams},
    errors::AppError,
    AppState,
};
use crate::{
    db::models::{
        AuditEntry, Device, DeviceUpdate, Medicine, MedicineUpdate, NewDevice, NewMedicine,
        NewReading, Reading, ReadingUpdate,
    },
    error::Error,
    monitoring::{
        expiry,
        stock::{self, ReplenishmentRecommendation},
    },
    store::{Session, StockSource},
};

/// Header carrying the name of the user performing an action.
pub const ACTOR_HEADER: &str = "x-actor";

/// Actor for user-initiated actions; falls back to `"anonymous"`.
fn user_actor(headers: &HeaderMap) -> String {
    header_actor(headers).unwrap_or_else(|| "anonymous".to_owned())
}

/// Reading posts and edits without an `x-actor` header come from the device
/// itself and are audited as automated.
fn reading_actor(headers: &HeaderMap, device_id: i64) -> (String, bool) {
    match header_actor(headers) {
        Some(user) => (user, false),
        None => (device_id.to_string(), true),
    }
}

fn header_actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

/// Evaluate every active device against its latest reading right now.
/// Nothing is notified; the violations are only returned.
#[utoipa::path(
    get,
    path = "/monitoring/conditions",
    responses(
        (status = 200, description = "Current violations", body = ConditionCheckResponse),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "monitoring"
)]
pub async fn check_conditions(
    State(state): State<AppState>,
) -> Result<Json<ConditionCheckResponse>, AppError> {
    let violations = state.monitor.run_condition_check_once().await?;
    Ok(Json(ConditionCheckResponse { violations }))
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/devices",
    responses((status = 200, description = "All devices", body = Vec<Device>)),
    tag = "devices"
)]
pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.list_devices().await?))
}

#[utoipa::path(
    get,
    path = "/devices/{id}",
    params(("id" = i64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Device", body = Device),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Device>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.get_device(id).await?))
}

#[utoipa::path(
    post,
    path = "/devices",
    request_body = NewDevice,
    responses(
        (status = 200, description = "Created device", body = Device),
        (status = 400, description = "Inverted threshold range"),
    ),
    tag = "devices"
)]
pub async fn create_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewDevice>,
) -> Result<Json<Device>, AppError> {
    let device = {
        let mut session = state.store.session().await?;
        session.create_device(body).await?
    };

    state
        .audit
        .record_or_log(
            "Create Sensor",
            &user_actor(&headers),
            &format!("Created sensor: {}.", device.id),
            false,
        )
        .await;
    Ok(Json(device))
}

#[utoipa::path(
    post,
    path = "/devices/{id}/activate",
    params(("id" = i64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Activated device", body = Device),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn activate_device(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
) -> Result<Json<Device>, AppError> {
    set_active(state, headers, id, true).await
}

#[utoipa::path(
    post,
    path = "/devices/{id}/deactivate",
    params(("id" = i64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Deactivated device", body = Device),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn deactivate_device(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
) -> Result<Json<Device>, AppError> {
    set_active(state, headers, id, false).await
}

async fn set_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    active: bool,
) -> Result<Json<Device>, AppError> {
    let device = {
        let mut session = state.store.session().await?;
        session.set_device_active(id, active).await?
    };

    let (action, verb) = if active {
        ("Activate Sensor", "Activated")
    } else {
        ("Deactivate Sensor", "Deactivated")
    };
    state
        .audit
        .record_or_log(action, &user_actor(&headers), &format!("{verb} sensor: {id}."), false)
        .await;
    Ok(Json(device))
}

#[utoipa::path(
    patch,
    path = "/devices/{id}",
    params(("id" = i64, Path, description = "Device ID")),
    request_body = DeviceUpdate,
    responses(
        (status = 200, description = "Updated device", body = Device),
        (status = 400, description = "Resulting range is inverted"),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn update_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<DeviceUpdate>,
) -> Result<Json<Device>, AppError> {
    let device = {
        let mut session = state.store.session().await?;
        session.update_device(id, body).await?
    };

    state
        .audit
        .record_or_log(
            "Update Sensor",
            &user_actor(&headers),
            &format!("Updated sensor: {id}."),
            false,
        )
        .await;
    Ok(Json(device))
}

/// Delete a device and all of its readings.
#[utoipa::path(
    delete,
    path = "/devices/{id}",
    params(("id" = i64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Deleted device", body = Device),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn delete_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Device>, AppError> {
    let device = {
        let mut session = state.store.session().await?;
        session.delete_device(id).await?
    };

    state
        .audit
        .record_or_log(
            "Delete Sensor",
            &user_actor(&headers),
            &format!("Deleted sensor: {id}."),
            false,
        )
        .await;
    Ok(Json(device))
}

/// All readings of one device, oldest first.
#[utoipa::path(
    get,
    path = "/devices/{id}/readings",
    params(("id" = i64, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Readings", body = Vec<Reading>),
        (status = 404, description = "No such device"),
    ),
    tag = "devices"
)]
pub async fn device_readings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let mut session = state.store.session().await?;
    session.get_device(id).await?;
    Ok(Json(session.readings_for_device(id).await?))
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Store one sensor sample. Without an `x-actor` header the post is treated
/// as coming from the device itself and audited as `Sensor {device_id}`.
#[utoipa::path(
    post,
    path = "/readings",
    request_body = NewReading,
    responses(
        (status = 200, description = "Stored reading", body = Reading),
        (status = 404, description = "No such device"),
    ),
    tag = "readings"
)]
pub async fn create_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewReading>,
) -> Result<Json<Reading>, AppError> {
    let reading = {
        let mut session = state.store.session().await?;
        session.create_reading(body).await?
    };

    let (actor, automated) = reading_actor(&headers, reading.device_id);
    state
        .audit
        .record_or_log(
            "Create Condition",
            &actor,
            &format!("Created Condition: {}.", reading.id),
            automated,
        )
        .await;
    Ok(Json(reading))
}

#[utoipa::path(
    get,
    path = "/readings/{id}",
    params(("id" = i64, Path, description = "Reading ID")),
    responses(
        (status = 200, description = "Reading", body = Reading),
        (status = 404, description = "No such reading"),
    ),
    tag = "readings"
)]
pub async fn get_reading(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Reading>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.get_reading(id).await?))
}

/// Correct a stored sample. The owning device and timestamp do not change.
#[utoipa::path(
    patch,
    path = "/readings/{id}",
    params(("id" = i64, Path, description = "Reading ID")),
    request_body = ReadingUpdate,
    responses(
        (status = 200, description = "Updated reading", body = Reading),
        (status = 404, description = "No such reading"),
    ),
    tag = "readings"
)]
pub async fn update_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ReadingUpdate>,
) -> Result<Json<Reading>, AppError> {
    let reading = {
        let mut session = state.store.session().await?;
        session.update_reading(id, body).await?
    };

    let (actor, automated) = reading_actor(&headers, reading.device_id);
    state
        .audit
        .record_or_log(
            "Update Condition",
            &actor,
            &format!("Updated Condition: {id}."),
            automated,
        )
        .await;
    Ok(Json(reading))
}

#[utoipa::path(
    delete,
    path = "/readings/{id}",
    params(("id" = i64, Path, description = "Reading ID")),
    responses(
        (status = 200, description = "Deleted reading", body = Reading),
        (status = 404, description = "No such reading"),
    ),
    tag = "readings"
)]
pub async fn delete_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Reading>, AppError> {
    let reading = {
        let mut session = state.store.session().await?;
        session.delete_reading(id).await?
    };

    let (actor, automated) = reading_actor(&headers, reading.device_id);
    state
        .audit
        .record_or_log(
            "Delete Condition",
            &actor,
            &format!("Deleted Condition: {id}."),
            automated,
        )
        .await;
    Ok(Json(reading))
}

// ---------------------------------------------------------------------------
// Medicines
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/medicines",
    responses((status = 200, description = "All medicines", body = Vec<Medicine>)),
    tag = "medicines"
)]
pub async fn list_medicines(
    State(state): State<AppState>,
) -> Result<Json<Vec<Medicine>>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.list_medicines().await?))
}

#[utoipa::path(
    get,
    path = "/medicines/{id}",
    params(("id" = i64, Path, description = "Medicine ID")),
    responses(
        (status = 200, description = "Medicine", body = Medicine),
        (status = 404, description = "No such medicine"),
    ),
    tag = "medicines"
)]
pub async fn get_medicine(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Medicine>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.get_medicine(id).await?))
}

#[utoipa::path(
    post,
    path = "/medicines",
    request_body = NewMedicine,
    responses(
        (status = 200, description = "Created medicine", body = Medicine),
        (status = 400, description = "Negative quantity or empty name"),
    ),
    tag = "medicines"
)]
pub async fn create_medicine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewMedicine>,
) -> Result<Json<Medicine>, AppError> {
    let medicine = {
        let mut session = state.store.session().await?;
        session.create_medicine(body).await?
    };

    state
        .audit
        .record_or_log(
            "Create Medicine",
            &user_actor(&headers),
            &format!("Created medicine: {}.", medicine.name),
            false,
        )
        .await;
    Ok(Json(medicine))
}

#[utoipa::path(
    patch,
    path = "/medicines/{id}",
    params(("id" = i64, Path, description = "Medicine ID")),
    request_body = MedicineUpdate,
    responses(
        (status = 200, description = "Updated medicine", body = Medicine),
        (status = 400, description = "Negative quantity or invalid name"),
        (status = 404, description = "No such medicine"),
    ),
    tag = "medicines"
)]
pub async fn update_medicine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<MedicineUpdate>,
) -> Result<Json<Medicine>, AppError> {
    let medicine = {
        let mut session = state.store.session().await?;
        session.update_medicine(id, body).await?
    };

    state
        .audit
        .record_or_log(
            "Update Medicine",
            &user_actor(&headers),
            &format!("Updated Medicine: {id}."),
            false,
        )
        .await;
    Ok(Json(medicine))
}

#[utoipa::path(
    delete,
    path = "/medicines/{id}",
    params(("id" = i64, Path, description = "Medicine ID")),
    responses(
        (status = 200, description = "Deleted medicine", body = Medicine),
        (status = 404, description = "No such medicine"),
    ),
    tag = "medicines"
)]
pub async fn delete_medicine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Medicine>, AppError> {
    let medicine = {
        let mut session = state.store.session().await?;
        session.delete_medicine(id).await?
    };

    state
        .audit
        .record_or_log(
            "Delete Medicine",
            &user_actor(&headers),
            &format!("Deleted Medicine: {id}."),
            false,
        )
        .await;
    Ok(Json(medicine))
}

/// Medicines expiring on or before now + `days`.
#[utoipa::path(
    get,
    path = "/medicines/expiring",
    params(ExpiringParams),
    responses((status = 200, description = "Expiring medicines", body = Vec<Medicine>)),
    tag = "medicines"
)]
pub async fn expiring_medicines(
    State(state): State<AppState>,
    Query(params): Query<ExpiringParams>,
) -> Result<Json<Vec<Medicine>>, AppError> {
    let window = match params.days {
        Some(days) => Duration::try_days(days)
            .ok_or_else(|| Error::Validation(format!("days out of range: {days}")))?,
        None => state.expiry_window,
    };
    let cutoff = Utc::now()
        .checked_add_signed(window)
        .ok_or_else(|| Error::Validation("expiry window out of range".to_owned()))?;

    let mut session = state.store.session().await?;
    Ok(Json(expiry::find_expiring(&mut *session, cutoff).await?))
}

#[utoipa::path(
    get,
    path = "/medicines/low-stock",
    params(LowStockParams),
    responses((status = 200, description = "Low-stock medicines", body = Vec<Medicine>)),
    tag = "medicines"
)]
pub async fn low_stock_medicines(
    State(state): State<AppState>,
    Query(params): Query<LowStockParams>,
) -> Result<Json<Vec<Medicine>>, AppError> {
    let threshold = params.threshold.unwrap_or(state.low_stock_threshold);
    let mut session = state.store.session().await?;
    Ok(Json(stock::find_low_stock(&mut *session, threshold).await?))
}

/// Order suggestions topping each low-stock medicine up to 100 units.
#[utoipa::path(
    get,
    path = "/medicines/replenishment",
    responses((status = 200, description = "Recommendations", body = Vec<ReplenishmentRecommendation>)),
    tag = "medicines"
)]
pub async fn replenishment(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReplenishmentRecommendation>>, AppError> {
    let mut session = state.store.session().await?;
    let low = stock::find_low_stock(&mut *session, state.low_stock_threshold).await?;
    Ok(Json(stock::recommend(&low)))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/audit",
    responses((status = 200, description = "Audit log, oldest first", body = Vec<AuditEntry>)),
    tag = "audit"
)]
pub async fn list_audit(State(state): State<AppState>) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let mut session = state.store.session().await?;
    Ok(Json(session.list_audit().await?))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        check_conditions,
        list_devices, get_device, create_device, update_device, delete_device,
        activate_device, deactivate_device, device_readings,
        create_reading, get_reading, update_reading, delete_reading,
        list_medicines, get_medicine, create_medicine, update_medicine, delete_medicine,
        expiring_medicines, low_stock_medicines, replenishment,
        list_audit,
        health,
    ),
    components(schemas(
        ConditionCheckResponse, Device, NewDevice, DeviceUpdate, Reading, NewReading, ReadingUpdate,
        Medicine, NewMedicine, MedicineUpdate, AuditEntry, ReplenishmentRecommendation,
    )),
    tags(
        (name = "monitoring", description = "On-demand storage condition checks"),
        (name = "devices",    description = "Storage units and their thresholds"),
        (name = "readings",   description = "Sensor telemetry"),
        (name = "medicines",  description = "Stock and expiry"),
        (name = "audit",      description = "Audit trail"),
        (name = "system",     description = "System endpoints"),
    ),
    info(
        title = "Pharmacy Storage Monitor API",
        version = "0.1.0",
        description = "REST API for pharmacy storage conditions, stock and alerts"
    )
)]
pub struct ApiDoc;
