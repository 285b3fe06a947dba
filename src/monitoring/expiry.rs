use chrono::{DateTime, Utc};

use crate::{db::models::Medicine, error::Result, store::StockSource};

/// Every medicine whose expiry date is on or before `cutoff`.
///
/// The cutoff policy (e.g. "now + 7 days") belongs to the caller.
pub async fn find_expiring<S>(source: &mut S, cutoff: DateTime<Utc>) -> Result<Vec<Medicine>>
where
    S: StockSource + ?Sized,
{
    let medicines = source.list_medicines().await?;
    Ok(expiring_by(medicines, cutoff))
}

/// Pure filter behind [`find_expiring`].
pub fn expiring_by(medicines: Vec<Medicine>, cutoff: DateTime<Utc>) -> Vec<Medicine> {
    medicines
        .into_iter()
        .filter(|m| m.expiry_date <= cutoff)
        .collect()
}

/// Alert text handed to the notification sink.
pub fn expiry_message(medicine: &Medicine) -> String {
    format!(
        "Medicine {} is expiring on {}.",
        medicine.name,
        medicine.expiry_date.format("%Y-%m-%d")
    )
}
