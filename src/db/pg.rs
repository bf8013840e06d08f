use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time;
use tracing::error;
use uuid::Uuid;

use super::{
    models::{
        Device, DeviceOverview, DevicePatch, NewDevice, NewUser, PowerReading, User, UserPatch,
    },
    store::{DeviceStore, ReadingStore, Store, UserStore},
};
use crate::{
    errors::{Error, Result},
    telemetry::{
        aggregate::{ReadingSummary, TimeRange},
        normalize::NormalizedReading,
    },
};

/// Postgres-backed store. Every call is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>> + Send,
    {
        match time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = Error::from(e);
                if let Error::StoreUnavailable(detail) = &err {
                    error!(op, error = %detail, "Store operation failed");
                }
                Err(err)
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                error!(op, timeout_ms, "Store operation timed out");
                Err(Error::StoreUnavailable(format!("{op} timed out")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[async_trait]
impl ReadingStore for PgStore {
    async fn insert_reading(
        &self,
        device_id: &str,
        reading: &NormalizedReading,
    ) -> Result<PowerReading> {
        let query = sqlx::query_as::<_, PowerReading>(
            r#"
            INSERT INTO power_readings
                (device_id, voltage, current, power, energy,
                 power_factor, frequency, temperature, humidity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, device_id, voltage, current, power, energy,
                      power_factor, frequency, temperature, humidity, recorded_at
            "#,
        )
        .bind(device_id)
        .bind(reading.voltage)
        .bind(reading.current)
        .bind(reading.power)
        .bind(reading.energy)
        .bind(reading.power_factor)
        .bind(reading.frequency)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .fetch_one(&self.pool);

        self.bounded("insert_reading", query).await
    }

    async fn get_reading(&self, id: Uuid) -> Result<PowerReading> {
        let query = sqlx::query_as::<_, PowerReading>(
            r#"
            SELECT id, device_id, voltage, current, power, energy,
                   power_factor, frequency, temperature, humidity, recorded_at
            FROM power_readings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool);

        self.bounded("get_reading", query)
            .await?
            .ok_or_else(|| Error::not_found("Power reading not found"))
    }

    async fn readings_in_range(
        &self,
        device_id: &str,
        range: TimeRange,
    ) -> Result<Vec<PowerReading>> {
        let query = sqlx::query_as::<_, PowerReading>(
            r#"
            SELECT id, device_id, voltage, current, power, energy,
                   power_factor, frequency, temperature, humidity, recorded_at
            FROM power_readings
            WHERE device_id   = $1
              AND recorded_at >= $2
              AND recorded_at <  $3
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(device_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool);

        self.bounded("readings_in_range", query).await
    }

    async fn latest_reading(&self, device_id: &str) -> Result<Option<PowerReading>> {
        let query = sqlx::query_as::<_, PowerReading>(
            r#"
            SELECT id, device_id, voltage, current, power, energy,
                   power_factor, frequency, temperature, humidity, recorded_at
            FROM power_readings
            WHERE device_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool);

        self.bounded("latest_reading", query).await
    }

    async fn summarize(
        &self,
        device_id: &str,
        range: Option<TimeRange>,
    ) -> Result<ReadingSummary> {
        let query = sqlx::query_as::<_, ReadingSummary>(
            r#"
            SELECT COUNT(*)                        AS reading_count,
                   COALESCE(SUM(energy), 0)        AS total_energy,
                   COALESCE(AVG(power), 0)         AS avg_power,
                   COALESCE(MAX(power), 0)         AS peak_power,
                   COALESCE(MIN(power), 0)         AS min_power,
                   COALESCE(AVG(voltage), 0)       AS avg_voltage,
                   COALESCE(AVG(current), 0)       AS avg_current,
                   MIN(recorded_at)                AS first_reading,
                   MAX(recorded_at)                AS last_reading
            FROM power_readings
            WHERE device_id = $1
              AND ($2::timestamptz IS NULL OR recorded_at >= $2)
              AND ($3::timestamptz IS NULL OR recorded_at <  $3)
            "#,
        )
        .bind(device_id)
        .bind(range.map(|r| r.start))
        .bind(range.map(|r| r.end))
        .fetch_one(&self.pool);

        self.bounded("summarize", query).await
    }

    async fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = sqlx::query("DELETE FROM power_readings WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool);

        Ok(self.bounded("delete_readings_before", query).await?.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[async_trait]
impl DeviceStore for PgStore {
    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (device_id, name, description, location, api_key)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, device_id, name, description, location, api_key,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(&device.description)
        .bind(&device.location)
        .bind(&device.api_key)
        .fetch_one(&self.pool);

        self.bounded("create_device", query).await
    }

    async fn device_by_id(&self, id: i64) -> Result<Device> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_id, name, description, location, api_key,
                   is_active, created_at, updated_at
            FROM devices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool);

        self.bounded("device_by_id", query)
            .await?
            .ok_or_else(|| Error::not_found("Device not found"))
    }

    async fn device_by_device_id(&self, device_id: &str) -> Result<Option<Device>> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_id, name, description, location, api_key,
                   is_active, created_at, updated_at
            FROM devices
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool);

        self.bounded("device_by_device_id", query).await
    }

    async fn active_device_by_api_key(&self, api_key: &str) -> Result<Option<Device>> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_id, name, description, location, api_key,
                   is_active, created_at, updated_at
            FROM devices
            WHERE api_key = $1
              AND is_active
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool);

        self.bounded("active_device_by_api_key", query).await
    }

    async fn list_devices(&self, limit: i64, offset: i64) -> Result<Vec<DeviceOverview>> {
        let query = sqlx::query_as::<_, DeviceOverview>(
            r#"
            SELECT d.id, d.device_id, d.name, d.description, d.location, d.api_key,
                   d.is_active, d.created_at, d.updated_at,
                   lr.voltage, lr.current, lr.power, lr.energy,
                   lr.recorded_at AS last_reading_time
            FROM devices d
            LEFT JOIN LATERAL (
                SELECT voltage, current, power, energy, recorded_at
                FROM power_readings pr
                WHERE pr.device_id = d.device_id
                ORDER BY recorded_at DESC
                LIMIT 1
            ) lr ON TRUE
            ORDER BY d.name, d.id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool);

        self.bounded("list_devices", query).await
    }

    async fn count_devices(&self) -> Result<i64> {
        let query = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool);

        self.bounded("count_devices", query).await
    }

    async fn update_device(&self, id: i64, patch: &DevicePatch) -> Result<Device> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET name        = COALESCE($2::text, name),
                description = CASE WHEN $3::boolean THEN $4::text ELSE description END,
                location    = CASE WHEN $5::boolean THEN $6::text ELSE location END,
                updated_at  = NOW()
            WHERE id = $1
            RETURNING id, device_id, name, description, location, api_key,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(patch.location.is_some())
        .bind(patch.location.clone().flatten())
        .fetch_optional(&self.pool);

        self.bounded("update_device", query)
            .await?
            .ok_or_else(|| Error::not_found("Device not found"))
    }

    async fn delete_device(&self, id: i64) -> Result<bool> {
        let query = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool);

        Ok(self.bounded("delete_device", query).await?.rows_affected() > 0)
    }

    async fn toggle_device_active(&self, id: i64) -> Result<Device> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET is_active = NOT is_active, updated_at = NOW()
            WHERE id = $1
            RETURNING id, device_id, name, description, location, api_key,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool);

        self.bounded("toggle_device_active", query)
            .await?
            .ok_or_else(|| Error::not_found("Device not found"))
    }

    async fn set_device_api_key(&self, id: i64, api_key: &str) -> Result<Device> {
        let query = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET api_key = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, device_id, name, description, location, api_key,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(api_key)
        .fetch_optional(&self.pool);

        self.bounded("set_device_api_key", query)
            .await?
            .ok_or_else(|| Error::not_found("Device not found"))
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let query = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, role, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool);

        self.bounded("create_user", query).await
    }

    async fn user_by_id(&self, id: i64) -> Result<User> {
        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool);

        self.bounded("user_by_id", query)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool);

        self.bounded("user_by_email", query).await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool);

        self.bounded("user_by_username", query).await
    }

    async fn count_users(&self) -> Result<i64> {
        let query = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool);

        self.bounded("count_users", query).await
    }

    async fn set_user_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let query = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool);

        if self.bounded("set_user_password", query).await?.rows_affected() == 0 {
            return Err(Error::not_found("User not found"));
        }
        Ok(())
    }

    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User> {
        let query = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username   = COALESCE($2, username),
                email      = COALESCE($3, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, email, password_hash, role, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.username.as_deref())
        .bind(patch.email.as_deref())
        .fetch_optional(&self.pool);

        self.bounded("update_user", query)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
