//! Narrow persistence interfaces used by the monitoring loops and the API.
//!
//! A [`Store`] hands out short-lived [`Session`]s. Each monitoring cycle and
//! each request opens its own session and drops it when done, so no handle is
//! ever shared between cycles or between the two loops.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    db::models::{
        AuditEntry, Device, DeviceUpdate, Medicine, MedicineUpdate, NewAuditEntry, NewDevice,
        NewMedicine, NewReading, Reading, ReadingUpdate,
    },
    error::Result,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read access to device thresholds and telemetry.
#[async_trait]
pub trait ConditionSource: Send {
    async fn list_active_devices(&mut self) -> Result<Vec<Device>>;

    /// Reading with the greatest `recorded_at` for `device_id`; ties go to
    /// the highest id.
    async fn latest_reading(&mut self, device_id: i64) -> Result<Option<Reading>>;
}

/// Read access to medicine stock.
#[async_trait]
pub trait StockSource: Send {
    async fn list_medicines(&mut self) -> Result<Vec<Medicine>>;
}

/// Full read/write handle over one connection.
#[async_trait]
pub trait Session: ConditionSource + StockSource {
    async fn list_devices(&mut self) -> Result<Vec<Device>>;
    async fn get_device(&mut self, id: i64) -> Result<Device>;
    async fn create_device(&mut self, device: NewDevice) -> Result<Device>;
    async fn set_device_active(&mut self, id: i64, active: bool) -> Result<Device>;
    async fn update_device(&mut self, id: i64, update: DeviceUpdate) -> Result<Device>;
    /// Removes the device together with its readings. Returns the removed row.
    async fn delete_device(&mut self, id: i64) -> Result<Device>;

    /// Fails with `NotFound` when the owning device does not exist.
    async fn create_reading(&mut self, reading: NewReading) -> Result<Reading>;
    async fn get_reading(&mut self, id: i64) -> Result<Reading>;
    async fn update_reading(&mut self, id: i64, update: ReadingUpdate) -> Result<Reading>;
    async fn delete_reading(&mut self, id: i64) -> Result<Reading>;
    async fn readings_for_device(&mut self, device_id: i64) -> Result<Vec<Reading>>;

    async fn get_medicine(&mut self, id: i64) -> Result<Medicine>;
    async fn create_medicine(&mut self, medicine: NewMedicine) -> Result<Medicine>;
    async fn update_medicine(&mut self, id: i64, update: MedicineUpdate) -> Result<Medicine>;
    async fn delete_medicine(&mut self, id: i64) -> Result<Medicine>;

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry>;
    /// All audit entries, oldest first.
    async fn list_audit(&mut self) -> Result<Vec<AuditEntry>>;
}

/// Opens sessions. Shared across tasks behind an `Arc`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn session(&self) -> Result<Box<dyn Session>>;
}
