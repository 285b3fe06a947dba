use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query for `GET /medicines/expiring`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExpiringParams {
    /// Look-ahead window in days. Defaults to the configured expiry window;
    /// `0` lists medicines already expired.
    pub days: Option<i64>,
}

/// Query for `GET /medicines/low-stock`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LowStockParams {
    /// Medicines with fewer units than this are returned. Defaults to the
    /// configured threshold.
    pub threshold: Option<i32>,
}

/// Response for `GET /monitoring/conditions`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConditionCheckResponse {
    /// One human-readable message per violation.
    pub violations: Vec<String>,
}
