use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConditionSource, Session, StockSource, Store};
use crate::{
    db::models::{
        AuditEntry, Device, DeviceUpdate, Medicine, MedicineUpdate, NewAuditEntry, NewDevice,
        NewMedicine, NewReading, Reading, ReadingUpdate,
    },
    error::{Error, Result},
};

/// In-process store used when no `DATABASE_URL` is configured, and by tests.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// `set_available(false)` makes every new session fail with a persistence
/// error, which is how an outage is simulated.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
    available: Arc<AtomicBool>,
}

#[derive(Default)]
struct Tables {
    devices: Vec<Device>,
    readings: Vec<Reading>,
    medicines: Vec<Medicine>,
    audit: Vec<AuditEntry>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Insert a device as-is, keeping its id. Test fixtures use this to pin ids.
    pub async fn insert_device(&self, device: Device) {
        let mut t = self.inner.write().await;
        t.next_id = t.next_id.max(device.id);
        t.devices.push(device);
    }

    /// Insert a reading as-is, keeping its id and timestamp.
    pub async fn insert_reading(&self, reading: Reading) {
        let mut t = self.inner.write().await;
        t.next_id = t.next_id.max(reading.id);
        t.readings.push(reading);
    }

    /// Insert a medicine as-is, keeping its id.
    pub async fn insert_medicine(&self, medicine: Medicine) {
        let mut t = self.inner.write().await;
        t.next_id = t.next_id.max(medicine.id);
        t.medicines.push(medicine);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Persistence("memory store unavailable".to_owned()));
        }
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemorySession {
    inner: Arc<RwLock<Tables>>,
}

#[async_trait]
impl ConditionSource for MemorySession {
    async fn list_active_devices(&mut self) -> Result<Vec<Device>> {
        let t = self.inner.read().await;
        Ok(t.devices.iter().filter(|d| d.is_active).cloned().collect())
    }

    async fn latest_reading(&mut self, device_id: i64) -> Result<Option<Reading>> {
        let t = self.inner.read().await;
        Ok(t.readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .max_by_key(|r| (r.recorded_at, r.id))
            .cloned())
    }
}

#[async_trait]
impl StockSource for MemorySession {
    async fn list_medicines(&mut self) -> Result<Vec<Medicine>> {
        Ok(self.inner.read().await.medicines.clone())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn list_devices(&mut self) -> Result<Vec<Device>> {
        Ok(self.inner.read().await.devices.clone())
    }

    async fn get_device(&mut self, id: i64) -> Result<Device> {
        self.inner
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("device", id))
    }

    async fn create_device(&mut self, device: NewDevice) -> Result<Device> {
        device.validate()?;
        let mut t = self.inner.write().await;
        let device = Device {
            id: t.next_id(),
            location: device.location,
            device_type: device.device_type,
            parameters: device.parameters,
            is_active: device.is_active,
            min_temperature: device.min_temperature,
            max_temperature: device.max_temperature,
            min_humidity: device.min_humidity,
            max_humidity: device.max_humidity,
        };
        t.devices.push(device.clone());
        Ok(device)
    }

    async fn set_device_active(&mut self, id: i64, active: bool) -> Result<Device> {
        let mut t = self.inner.write().await;
        let device = t
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::not_found("device", id))?;
        device.is_active = active;
        Ok(device.clone())
    }

    async fn update_device(&mut self, id: i64, update: DeviceUpdate) -> Result<Device> {
        let mut t = self.inner.write().await;
        let slot = t
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::not_found("device", id))?;
        *slot = update.apply(slot.clone())?;
        Ok(slot.clone())
    }

    async fn delete_device(&mut self, id: i64) -> Result<Device> {
        let mut t = self.inner.write().await;
        let pos = t
            .devices
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| Error::not_found("device", id))?;
        t.readings.retain(|r| r.device_id != id);
        Ok(t.devices.remove(pos))
    }

    async fn create_reading(&mut self, reading: NewReading) -> Result<Reading> {
        let mut t = self.inner.write().await;
        if !t.devices.iter().any(|d| d.id == reading.device_id) {
            return Err(Error::not_found("device", reading.device_id));
        }
        let reading = Reading {
            id: t.next_id(),
            device_id: reading.device_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            recorded_at: Utc::now(),
        };
        t.readings.push(reading.clone());
        Ok(reading)
    }

    async fn get_reading(&mut self, id: i64) -> Result<Reading> {
        self.inner
            .read()
            .await
            .readings
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("reading", id))
    }

    async fn update_reading(&mut self, id: i64, update: ReadingUpdate) -> Result<Reading> {
        let mut t = self.inner.write().await;
        let slot = t
            .readings
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("reading", id))?;
        *slot = update.apply(slot.clone());
        Ok(slot.clone())
    }

    async fn delete_reading(&mut self, id: i64) -> Result<Reading> {
        let mut t = self.inner.write().await;
        let pos = t
            .readings
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::not_found("reading", id))?;
        Ok(t.readings.remove(pos))
    }

    async fn readings_for_device(&mut self, device_id: i64) -> Result<Vec<Reading>> {
        let t = self.inner.read().await;
        let mut readings: Vec<_> = t
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        readings.sort_by_key(|r| (r.recorded_at, r.id));
        Ok(readings)
    }

    async fn get_medicine(&mut self, id: i64) -> Result<Medicine> {
        self.inner
            .read()
            .await
            .medicines
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("medicine", id))
    }

    async fn create_medicine(&mut self, medicine: NewMedicine) -> Result<Medicine> {
        medicine.validate()?;
        let mut t = self.inner.write().await;
        let medicine = Medicine {
            id: t.next_id(),
            name: medicine.name,
            medicine_type: medicine.medicine_type,
            expiry_date: medicine.expiry_date,
            quantity: medicine.quantity,
            category: medicine.category,
        };
        t.medicines.push(medicine.clone());
        Ok(medicine)
    }

    async fn update_medicine(&mut self, id: i64, update: MedicineUpdate) -> Result<Medicine> {
        let mut t = self.inner.write().await;
        let slot = t
            .medicines
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::not_found("medicine", id))?;
        *slot = update.apply(slot.clone())?;
        Ok(slot.clone())
    }

    async fn delete_medicine(&mut self, id: i64) -> Result<Medicine> {
        let mut t = self.inner.write().await;
        let pos = t
            .medicines
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| Error::not_found("medicine", id))?;
        Ok(t.medicines.remove(pos))
    }

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            action: entry.action,
            actor: entry.actor,
            recorded_at: Utc::now(),
            details: entry.details,
        };
        self.inner.write().await.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(&mut self) -> Result<Vec<AuditEntry>> {
        let mut entries = self.inner.read().await.audit.clone();
        // Stable sort keeps insertion order for identical timestamps.
        entries.sort_by_key(|e| e.recorded_at);
        Ok(entries)
    }
}
