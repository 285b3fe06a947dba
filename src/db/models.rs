use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A monitored storage unit (fridge, cabinet, room) and its acceptable
/// temperature / humidity ranges.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Device {
    pub id: i64,
    pub location: String,
    #[serde(rename = "type")]
    pub device_type: String,
    /// Free-form configuration string passed through to the sensor firmware.
    pub parameters: String,
    pub is_active: bool,
    /// Degrees Celsius
    pub min_temperature: f64,
    /// Degrees Celsius
    pub max_temperature: f64,
    /// Relative humidity percentage
    pub min_humidity: f64,
    /// Relative humidity percentage
    pub max_humidity: f64,
}

/// Request body for `POST /devices`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewDevice {
    pub location: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub is_active: bool,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_humidity: f64,
    pub max_humidity: f64,
}

impl NewDevice {
    /// Rejects inverted ranges and over-long text. Evaluation never
    /// re-checks this.
    pub fn validate(&self) -> Result<()> {
        check_device(
            &self.location,
            &self.device_type,
            (self.min_temperature, self.max_temperature),
            (self.min_humidity, self.max_humidity),
        )
    }
}

/// Request body for `PATCH /devices/{id}`. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DeviceUpdate {
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub parameters: Option<String>,
    pub is_active: Option<bool>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
}

impl DeviceUpdate {
    /// Merge into `device` and validate the result as a whole, so a patch
    /// can move both ends of a range at once.
    pub fn apply(self, mut device: Device) -> Result<Device> {
        if let Some(v) = self.location {
            device.location = v;
        }
        if let Some(v) = self.device_type {
            device.device_type = v;
        }
        if let Some(v) = self.parameters {
            device.parameters = v;
        }
        if let Some(v) = self.is_active {
            device.is_active = v;
        }
        device.min_temperature = self.min_temperature.unwrap_or(device.min_temperature);
        device.max_temperature = self.max_temperature.unwrap_or(device.max_temperature);
        device.min_humidity = self.min_humidity.unwrap_or(device.min_humidity);
        device.max_humidity = self.max_humidity.unwrap_or(device.max_humidity);

        check_device(
            &device.location,
            &device.device_type,
            (device.min_temperature, device.max_temperature),
            (device.min_humidity, device.max_humidity),
        )?;
        Ok(device)
    }
}

fn check_device(
    location: &str,
    device_type: &str,
    temperature: (f64, f64),
    humidity: (f64, f64),
) -> Result<()> {
    check_text("location", location)?;
    check_text("type", device_type)?;
    check_range("temperature", temperature)?;
    check_range("humidity", humidity)
}

fn check_range(dimension: &str, (min, max): (f64, f64)) -> Result<()> {
    if min > max {
        return Err(Error::Validation(format!(
            "min_{dimension} {min} exceeds max_{dimension} {max}"
        )));
    }
    Ok(())
}

/// Longest accepted name, location or type; matches the `VARCHAR(50)`
/// columns.
pub const MAX_TEXT_LEN: usize = 50;

fn check_text(field: &str, value: &str) -> Result<()> {
    let len = value.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(Error::Validation(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters, got {len}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One temperature / humidity sample reported by a device.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    pub id: i64,
    pub device_id: i64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Request body for `POST /readings`. The timestamp is assigned by the store.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewReading {
    pub device_id: i64,
    pub temperature: f64,
    pub humidity: f64,
}

/// Request body for `PATCH /readings/{id}`. Owner and timestamp are fixed.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ReadingUpdate {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl ReadingUpdate {
    pub fn apply(self, mut reading: Reading) -> Reading {
        reading.temperature = self.temperature.unwrap_or(reading.temperature);
        reading.humidity = self.humidity.unwrap_or(reading.humidity);
        reading
    }
}

// ---------------------------------------------------------------------------
// Medicine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Medicine {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub medicine_type: String,
    pub expiry_date: DateTime<Utc>,
    pub quantity: i32,
    pub category: String,
}

/// Request body for `POST /medicines`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewMedicine {
    pub name: String,
    #[serde(rename = "type")]
    pub medicine_type: String,
    pub expiry_date: DateTime<Utc>,
    pub quantity: i32,
    #[serde(default)]
    pub category: String,
}

impl NewMedicine {
    pub fn validate(&self) -> Result<()> {
        check_medicine(&self.name, &self.medicine_type, self.quantity)
    }
}

/// Request body for `PATCH /medicines/{id}`. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct MedicineUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub medicine_type: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub quantity: Option<i32>,
    pub category: Option<String>,
}

impl MedicineUpdate {
    pub fn apply(self, mut medicine: Medicine) -> Result<Medicine> {
        if let Some(v) = self.name {
            medicine.name = v;
        }
        if let Some(v) = self.medicine_type {
            medicine.medicine_type = v;
        }
        if let Some(v) = self.category {
            medicine.category = v;
        }
        medicine.expiry_date = self.expiry_date.unwrap_or(medicine.expiry_date);
        medicine.quantity = self.quantity.unwrap_or(medicine.quantity);

        check_medicine(&medicine.name, &medicine.medicine_type, medicine.quantity)?;
        Ok(medicine)
    }
}

fn check_medicine(name: &str, medicine_type: &str, quantity: i32) -> Result<()> {
    if quantity < 0 {
        return Err(Error::Validation(format!(
            "quantity must not be negative, got {quantity}"
        )));
    }
    if name.trim().is_empty() {
        return Err(Error::Validation("name must not be empty".to_owned()));
    }
    check_text("name", name)?;
    check_text("type", medicine_type)
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Immutable record of a state-changing action.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    /// User name, or `"Sensor {id}"` for automated actions.
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
    pub details: String,
}

/// An audit entry before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: String,
    pub actor: String,
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(min_t: f64, max_t: f64, min_h: f64, max_h: f64) -> NewDevice {
        NewDevice {
            location: "Fridge A".to_owned(),
            device_type: "fridge".to_owned(),
            parameters: String::new(),
            is_active: true,
            min_temperature: min_t,
            max_temperature: max_t,
            min_humidity: min_h,
            max_humidity: max_h,
        }
    }

    #[test]
    fn valid_device_ranges_pass() {
        assert!(device(2.0, 8.0, 30.0, 60.0).validate().is_ok());
        // Degenerate single-point range is allowed.
        assert!(device(5.0, 5.0, 40.0, 40.0).validate().is_ok());
    }

    #[test]
    fn inverted_temperature_range_is_rejected() {
        let err = device(8.0, 2.0, 30.0, 60.0).validate().unwrap_err();
        assert!(err.to_string().contains("min_temperature"));
    }

    #[test]
    fn inverted_humidity_range_is_rejected() {
        let err = device(2.0, 8.0, 60.0, 30.0).validate().unwrap_err();
        assert!(err.to_string().contains("min_humidity"));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let m = NewMedicine {
            name: "Insulin".to_owned(),
            medicine_type: "injection".to_owned(),
            expiry_date: Utc::now(),
            quantity: -1,
            category: String::new(),
        };
        assert!(matches!(m.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn overlong_text_is_rejected() {
        let mut d = device(2.0, 8.0, 30.0, 60.0);
        d.location = "x".repeat(MAX_TEXT_LEN);
        assert!(d.validate().is_ok());
        d.location.push('x');
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("location"));

        let m = NewMedicine {
            name: "N".repeat(MAX_TEXT_LEN + 1),
            medicine_type: "tablet".to_owned(),
            expiry_date: Utc::now(),
            quantity: 1,
            category: String::new(),
        };
        assert!(matches!(m.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn device_patch_merges_then_validates() {
        let current = Device {
            id: 4,
            location: "Fridge A".to_owned(),
            device_type: "fridge".to_owned(),
            parameters: String::new(),
            is_active: true,
            min_temperature: 2.0,
            max_temperature: 8.0,
            min_humidity: 30.0,
            max_humidity: 60.0,
        };

        // Moving both ends at once is fine even though min alone would invert.
        let moved = DeviceUpdate {
            min_temperature: Some(10.0),
            max_temperature: Some(15.0),
            ..Default::default()
        }
        .apply(current.clone())
        .unwrap();
        assert_eq!((moved.min_temperature, moved.max_temperature), (10.0, 15.0));
        assert_eq!(moved.location, "Fridge A");

        let inverted = DeviceUpdate {
            min_humidity: Some(70.0),
            ..Default::default()
        }
        .apply(current);
        assert!(matches!(inverted, Err(Error::Validation(_))));
    }

    #[test]
    fn medicine_patch_rejects_negative_quantity() {
        let current = Medicine {
            id: 1,
            name: "Insulin".to_owned(),
            medicine_type: "injection".to_owned(),
            expiry_date: Utc::now(),
            quantity: 5,
            category: String::new(),
        };
        let patched = MedicineUpdate {
            quantity: Some(12),
            ..Default::default()
        }
        .apply(current.clone())
        .unwrap();
        assert_eq!(patched.quantity, 12);
        assert_eq!(patched.name, "Insulin");

        let bad = MedicineUpdate {
            quantity: Some(-1),
            ..Default::default()
        };
        assert!(bad.apply(current).is_err());
    }

    #[test]
    fn device_type_serializes_as_type() {
        let json = serde_json::json!({
            "location": "Room 1",
            "type": "cabinet",
            "min_temperature": 15.0,
            "max_temperature": 25.0,
            "min_humidity": 20.0,
            "max_humidity": 70.0
        });
        let d: NewDevice = serde_json::from_value(json).unwrap();
        assert_eq!(d.device_type, "cabinet");
        assert!(!d.is_active);
        assert!(d.parameters.is_empty());
    }
}
