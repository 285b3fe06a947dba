pub mod dto;
pub mod errors;
pub mod handlers;


use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{audit::AuditRecorder, monitoring::Monitor, store::Store};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub monitor: Arc<Monitor>,
    pub audit: AuditRecorder,
    /// Default look-ahead for `GET /medicines/expiring`.
    pub expiry_window: chrono::Duration,
    pub low_stock_threshold: i32,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/monitoring/conditions", get(handlers::check_conditions))
        .route(
            "/devices",
            get(handlers::list_devices).post(handlers::create_device),
        )
        .route(
            "/devices/{id}",
            get(handlers::get_device)
                .patch(handlers::update_device)
                .delete(handlers::delete_device),
        )
        .route("/devices/{id}/activate", post(handlers::activate_device))
        .route("/devices/{id}/deactivate", post(handlers::deactivate_device))
        .route("/devices/{id}/readings", get(handlers::device_readings))
        .route("/readings", post(handlers::create_reading))
        .route(
            "/readings/{id}",
            get(handlers::get_reading)
                .patch(handlers::update_reading)
                .delete(handlers::delete_reading),
        )
        .route(
            "/medicines",
            get(handlers::list_medicines).post(handlers::create_medicine),
        )
        .route("/medicines/expiring", get(handlers::expiring_medicines))
        .route("/medicines/low-stock", get(handlers::low_stock_medicines))
        .route("/medicines/replenishment", get(handlers::replenishment))
        .route(
            "/medicines/{id}",
            get(handlers::get_medicine)
                .patch(handlers::update_medicine)
                .delete(handlers::delete_medicine),
        )
        .route("/audit", get(handlers::list_audit))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
