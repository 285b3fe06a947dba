use serde::Serialize;
use utoipa::ToSchema;

use crate::{db::models::Medicine, error::Result, store::StockSource};

/// Quantity a replenishment order tops stock up to.
pub const REPLENISH_TARGET: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReplenishmentRecommendation {
    pub medicine_id: i64,
    pub medicine_name: String,
    pub recommended_quantity: i32,
}

/// Medicines with `quantity < threshold`.
pub async fn find_low_stock<S>(source: &mut S, threshold: i32) -> Result<Vec<Medicine>>
where
    S: StockSource + ?Sized,
{
    let medicines = source.list_medicines().await?;
    Ok(medicines
        .into_iter()
        .filter(|m| m.quantity < threshold)
        .collect())
}

/// One recommendation per low-stock medicine, ordering enough to reach
/// [`REPLENISH_TARGET`]. Stock already at or above the target orders zero.
pub fn recommend(low_stock: &[Medicine]) -> Vec<ReplenishmentRecommendation> {
    low_stock
        .iter()
        .map(|m| ReplenishmentRecommendation {
            medicine_id: m.id,
            medicine_name: m.name.clone(),
            recommended_quantity: (REPLENISH_TARGET - m.quantity).max(0),
        })
        .collect()
}
