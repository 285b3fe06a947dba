use async_trait::async_trait;
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use uuid::Uuid;

use super::{ConditionSource, Session, StockSource, Store};
use crate::{
    db::models::{
        AuditEntry, Device, DeviceUpdate, Medicine, MedicineUpdate, NewAuditEntry, NewDevice,
        NewMedicine, NewReading, Reading, ReadingUpdate,
    },
    error::{Error, Result},
};

const DEVICE_COLUMNS: &str = "id, location, device_type, parameters, is_active, \
     min_temperature, max_temperature, min_humidity, max_humidity";

const READING_COLUMNS: &str = "id, device_id, temperature, humidity, recorded_at";

const MEDICINE_COLUMNS: &str = "id, name, medicine_type, expiry_date, quantity, category";

/// PostgreSQL-backed store. Every session holds one pooled connection, which
/// goes back to the pool when the session is dropped.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl ConditionSource for PgSession {
    async fn list_active_devices(&mut self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE is_active ORDER BY id"
        ))
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    async fn latest_reading(&mut self, device_id: i64) -> Result<Option<Reading>> {
        let row = sqlx::query_as::<_, Reading>(&format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE device_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(device_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl StockSource for PgSession {
    async fn list_medicines(&mut self) -> Result<Vec<Medicine>> {
        let rows = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines ORDER BY id"
        ))
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Session for PgSession {
    async fn list_devices(&mut self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"
        ))
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    async fn get_device(&mut self, id: i64) -> Result<Device> {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("device", id))
    }

    async fn create_device(&mut self, device: NewDevice) -> Result<Device> {
        device.validate()?;
        let row = sqlx::query_as::<_, Device>(&format!(
            r#"
            INSERT INTO devices (location, device_type, parameters, is_active,
                                 min_temperature, max_temperature, min_humidity, max_humidity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(&device.location)
        .bind(&device.device_type)
        .bind(&device.parameters)
        .bind(device.is_active)
        .bind(device.min_temperature)
        .bind(device.max_temperature)
        .bind(device.min_humidity)
        .bind(device.max_humidity)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row)
    }

    async fn set_device_active(&mut self, id: i64, active: bool) -> Result<Device> {
        sqlx::query_as::<_, Device>(&format!(
            "UPDATE devices SET is_active = $2 WHERE id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("device", id))
    }

    async fn update_device(&mut self, id: i64, update: DeviceUpdate) -> Result<Device> {
        let device = update.apply(self.get_device(id).await?)?;
        sqlx::query_as::<_, Device>(&format!(
            r#"
            UPDATE devices
            SET location = $2, device_type = $3, parameters = $4, is_active = $5,
                min_temperature = $6, max_temperature = $7, min_humidity = $8, max_humidity = $9
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&device.location)
        .bind(&device.device_type)
        .bind(&device.parameters)
        .bind(device.is_active)
        .bind(device.min_temperature)
        .bind(device.max_temperature)
        .bind(device.min_humidity)
        .bind(device.max_humidity)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("device", id))
    }

    async fn delete_device(&mut self, id: i64) -> Result<Device> {
        // Readings go with it via ON DELETE CASCADE.
        sqlx::query_as::<_, Device>(&format!(
            "DELETE FROM devices WHERE id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("device", id))
    }

    async fn create_reading(&mut self, reading: NewReading) -> Result<Reading> {
        // Check explicitly so a missing device surfaces as NotFound rather
        // than a foreign-key violation.
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM devices WHERE id = $1)")
            .bind(reading.device_id)
            .fetch_one(&mut *self.conn)
            .await?;
        if !exists {
            return Err(Error::not_found("device", reading.device_id));
        }

        let row = sqlx::query_as::<_, Reading>(&format!(
            r#"
            INSERT INTO readings (device_id, temperature, humidity)
            VALUES ($1, $2, $3)
            RETURNING {READING_COLUMNS}
            "#
        ))
        .bind(reading.device_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row)
    }

    async fn get_reading(&mut self, id: i64) -> Result<Reading> {
        sqlx::query_as::<_, Reading>(&format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("reading", id))
    }

    async fn update_reading(&mut self, id: i64, update: ReadingUpdate) -> Result<Reading> {
        sqlx::query_as::<_, Reading>(&format!(
            r#"
            UPDATE readings
            SET temperature = COALESCE($2, temperature),
                humidity    = COALESCE($3, humidity)
            WHERE id = $1
            RETURNING {READING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.temperature)
        .bind(update.humidity)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("reading", id))
    }

    async fn delete_reading(&mut self, id: i64) -> Result<Reading> {
        sqlx::query_as::<_, Reading>(&format!(
            "DELETE FROM readings WHERE id = $1 RETURNING {READING_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("reading", id))
    }

    async fn readings_for_device(&mut self, device_id: i64) -> Result<Vec<Reading>> {
        let rows = sqlx::query_as::<_, Reading>(&format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE device_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#
        ))
        .bind(device_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    async fn get_medicine(&mut self, id: i64) -> Result<Medicine> {
        sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("medicine", id))
    }

    async fn create_medicine(&mut self, medicine: NewMedicine) -> Result<Medicine> {
        medicine.validate()?;
        let row = sqlx::query_as::<_, Medicine>(&format!(
            r#"
            INSERT INTO medicines (name, medicine_type, expiry_date, quantity, category)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MEDICINE_COLUMNS}
            "#
        ))
        .bind(&medicine.name)
        .bind(&medicine.medicine_type)
        .bind(medicine.expiry_date)
        .bind(medicine.quantity)
        .bind(&medicine.category)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row)
    }

    async fn update_medicine(&mut self, id: i64, update: MedicineUpdate) -> Result<Medicine> {
        let medicine = update.apply(self.get_medicine(id).await?)?;
        sqlx::query_as::<_, Medicine>(&format!(
            r#"
            UPDATE medicines
            SET name = $2, medicine_type = $3, expiry_date = $4, quantity = $5, category = $6
            WHERE id = $1
            RETURNING {MEDICINE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&medicine.name)
        .bind(&medicine.medicine_type)
        .bind(medicine.expiry_date)
        .bind(medicine.quantity)
        .bind(&medicine.category)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("medicine", id))
    }

    async fn delete_medicine(&mut self, id: i64) -> Result<Medicine> {
        sqlx::query_as::<_, Medicine>(&format!(
            "DELETE FROM medicines WHERE id = $1 RETURNING {MEDICINE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| Error::not_found("medicine", id))
    }

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let row = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_log (id, action, actor, details)
            VALUES ($1, $2, $3, $4)
            RETURNING id, action, actor, recorded_at, details
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.details)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(row)
    }

    async fn list_audit(&mut self) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, action, actor, recorded_at, details FROM audit_log \
             ORDER BY recorded_at ASC, seq ASC",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn store(pool: &PgPool) -> PgStore {
        PgStore::new(pool.clone())
    }

    fn fridge(location: &str, is_active: bool) -> NewDevice {
        NewDevice {
            location: location.to_owned(),
            device_type: "fridge".to_owned(),
            parameters: String::new(),
            is_active,
            min_temperature: 2.0,
            max_temperature: 8.0,
            min_humidity: 30.0,
            max_humidity: 60.0,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_000_000 + secs, 0).unwrap()
    }

    /// Insert with a pinned id and timestamp so ordering can be asserted.
    async fn insert_reading(pool: &PgPool, id: i64, device_id: i64, temperature: f64, recorded_at: DateTime<Utc>) {
        sqlx::query(
            "INSERT INTO readings (id, device_id, temperature, humidity, recorded_at) \
             VALUES ($1, $2, $3, 45.0, $4)",
        )
        .bind(id)
        .bind(device_id)
        .bind(temperature)
        .bind(recorded_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_reading_orders_by_time_then_id(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let device = s.create_device(fridge("Fridge A", true)).await.unwrap();

        insert_reading(&pool, 100, device.id, 5.0, at(0)).await;
        insert_reading(&pool, 101, device.id, 9.0, at(60)).await;
        insert_reading(&pool, 102, device.id, 4.0, at(30)).await;
        assert_eq!(s.latest_reading(device.id).await.unwrap().unwrap().id, 101);

        // Same timestamp as 101: the higher id wins.
        insert_reading(&pool, 90, device.id, 6.0, at(60)).await;
        insert_reading(&pool, 110, device.id, 7.0, at(60)).await;
        let latest = s.latest_reading(device.id).await.unwrap().unwrap();
        assert_eq!(latest.id, 110);
        assert_eq!(latest.temperature, 7.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_reading_absent_without_telemetry(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let device = s.create_device(fridge("Fridge A", true)).await.unwrap();
        assert!(s.latest_reading(device.id).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn only_active_devices_are_monitored(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let on = s.create_device(fridge("Fridge A", true)).await.unwrap();
        let off = s.create_device(fridge("Fridge B", false)).await.unwrap();

        let active = s.list_active_devices().await.unwrap();
        assert_eq!(active, vec![on.clone()]);
        assert_eq!(s.list_devices().await.unwrap().len(), 2);

        s.set_device_active(off.id, true).await.unwrap();
        assert_eq!(s.list_active_devices().await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reading_for_unknown_device_is_not_found(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let err = s
            .create_reading(NewReading {
                device_id: 404,
                temperature: 5.0,
                humidity: 40.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "device", id: 404 }));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn created_reading_round_trips(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let device = s.create_device(fridge("Fridge A", true)).await.unwrap();
        let reading = s
            .create_reading(NewReading {
                device_id: device.id,
                temperature: 5.5,
                humidity: 41.0,
            })
            .await
            .unwrap();
        assert_eq!(s.get_reading(reading.id).await.unwrap(), reading);
        assert_eq!(s.readings_for_device(device.id).await.unwrap(), vec![reading]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn audit_is_listed_in_append_order(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        for action in ["Create Sensor", "Create Condition", "Delete Sensor"] {
            s.append_audit(NewAuditEntry {
                action: action.to_owned(),
                actor: "admin".to_owned(),
                details: String::new(),
            })
            .await
            .unwrap();
        }

        let actions: Vec<_> = s
            .list_audit()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, ["Create Sensor", "Create Condition", "Delete Sensor"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_device_cascades_to_readings(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let device = s.create_device(fridge("Fridge A", true)).await.unwrap();
        insert_reading(&pool, 100, device.id, 5.0, at(0)).await;

        assert_eq!(s.delete_device(device.id).await.unwrap().id, device.id);
        assert!(matches!(s.get_reading(100).await, Err(Error::NotFound { .. })));
        assert!(matches!(
            s.delete_device(device.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn patches_are_persisted(pool: PgPool) {
        let mut s = store(&pool).session().await.unwrap();
        let device = s.create_device(fridge("Fridge A", true)).await.unwrap();
        let patched = s
            .update_device(
                device.id,
                DeviceUpdate {
                    location: Some("Cold room".to_owned()),
                    max_temperature: Some(6.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(s.get_device(device.id).await.unwrap(), patched);
        assert_eq!(patched.location, "Cold room");
        assert_eq!(patched.min_temperature, 2.0);

        insert_reading(&pool, 100, device.id, 5.0, at(0)).await;
        let reading = s
            .update_reading(
                100,
                ReadingUpdate {
                    humidity: Some(70.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!((reading.temperature, reading.humidity), (5.0, 70.0));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn schema_rejections_are_validation_errors(pool: PgPool) {
        // Bypass NewDevice::validate to hit the CHECK constraint directly.
        let err: Error = sqlx::query(
            "INSERT INTO devices (location, device_type, min_temperature, max_temperature, \
             min_humidity, max_humidity) VALUES ('A', 'fridge', 8, 2, 30, 60)",
        )
        .execute(&pool)
        .await
        .unwrap_err()
        .into();
        assert!(matches!(err, Error::Validation(_)));

        let err: Error = sqlx::query(
            "INSERT INTO medicines (name, medicine_type, expiry_date, quantity) \
             VALUES ($1, 'tablet', now(), 1)",
        )
        .bind("x".repeat(80))
        .execute(&pool)
        .await
        .unwrap_err()
        .into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
