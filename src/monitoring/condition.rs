use std::fmt;

use chrono::{DateTime, Utc};

use crate::{
    db::models::{Device, Reading},
    error::Result,
    store::ConditionSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Temperature,
    Humidity,
}

impl Dimension {
    fn label(self) -> &'static str {
        match self {
            Dimension::Temperature => "Temperature",
            Dimension::Humidity => "Humidity",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Dimension::Temperature => "°C",
            Dimension::Humidity => "%",
        }
    }
}

/// One out-of-range dimension on one device's latest reading. Lives only for
/// the cycle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub device_id: i64,
    pub dimension: Dimension,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.dimension.unit();
        write!(
            f,
            "{} violation for Device {} at {}: {}{unit} (Expected: {}–{}{unit})",
            self.dimension.label(),
            self.device_id,
            self.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.value,
            self.min,
            self.max,
        )
    }
}

/// Compare `reading` against the device's ranges.
///
/// A device without telemetry yields nothing. Bounds are inclusive: a value
/// equal to min or max is in range.
pub fn evaluate(device: &Device, reading: Option<&Reading>) -> Vec<Violation> {
    let Some(reading) = reading else {
        return Vec::new();
    };

    let checks = [
        (
            Dimension::Temperature,
            reading.temperature,
            device.min_temperature,
            device.max_temperature,
        ),
        (
            Dimension::Humidity,
            reading.humidity,
            device.min_humidity,
            device.max_humidity,
        ),
    ];

    checks
        .into_iter()
        .filter(|&(_, value, min, max)| value < min || value > max)
        .map(|(dimension, value, min, max)| Violation {
            device_id: device.id,
            dimension,
            value,
            min,
            max,
            recorded_at: reading.recorded_at,
        })
        .collect()
}

/// Evaluate every active device exactly once against its latest reading.
pub async fn check_all<S>(source: &mut S) -> Result<Vec<Violation>>
where
    S: ConditionSource + ?Sized,
{
    let devices = source.list_active_devices().await?;
    let mut violations = Vec::new();

    for device in &devices {
        let latest = source.latest_reading(device.id).await?;
        violations.extend(evaluate(device, latest.as_ref()));
    }

    Ok(violations)
}
