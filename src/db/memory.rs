use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
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
        aggregate::{summarize, ReadingSummary, TimeRange},
        normalize::NormalizedReading,
    },
};

/// In-process store with the same integrity rules as the Postgres schema:
/// readings must reference an existing device, device ids, API keys,
/// usernames and emails are unique, deleting a device deletes its readings.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other;
/// each write holds the lock for a single row, so readers never see a torn
/// reading.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    devices: BTreeMap<i64, Device>,
    readings: Vec<PowerReading>,
    users: BTreeMap<i64, User>,
    next_device_id: i64,
    next_user_id: i64,
}

impl Inner {
    fn device_mut(&mut self, id: i64) -> Result<&mut Device> {
        self.devices
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Device not found"))
    }

    fn device_readings<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = &'a PowerReading> {
        self.readings.iter().filter(move |r| r.device_id == device_id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading with an explicit timestamp, bypassing the server clock.
    pub async fn insert_reading_at(
        &self,
        device_id: &str,
        reading: &NormalizedReading,
        recorded_at: DateTime<Utc>,
    ) -> Result<PowerReading> {
        let mut inner = self.inner.write().await;
        if !inner.devices.values().any(|d| d.device_id == device_id) {
            return Err(Error::not_found("Device not found"));
        }

        let stored = PowerReading {
            id: Uuid::new_v4(),
            device_id: device_id.to_owned(),
            voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
            energy: reading.energy,
            power_factor: reading.power_factor,
            frequency: reading.frequency,
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: recorded_at,
        };
        inner.readings.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert_reading(
        &self,
        device_id: &str,
        reading: &NormalizedReading,
    ) -> Result<PowerReading> {
        self.insert_reading_at(device_id, reading, Utc::now()).await
    }

    async fn get_reading(&self, id: Uuid) -> Result<PowerReading> {
        self.inner
            .read()
            .await
            .readings
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("Power reading not found"))
    }

    async fn readings_in_range(
        &self,
        device_id: &str,
        range: TimeRange,
    ) -> Result<Vec<PowerReading>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .device_readings(device_id)
            .filter(|r| range.contains(r.timestamp))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn latest_reading(&self, device_id: &str) -> Result<Option<PowerReading>> {
        let inner = self.inner.read().await;
        // Later appends win ties, like insertion order would in the log.
        Ok(inner
            .device_readings(device_id)
            .fold(None::<&PowerReading>, |best, r| match best {
                Some(b) if b.timestamp > r.timestamp => Some(b),
                _ => Some(r),
            })
            .cloned())
    }

    async fn summarize(
        &self,
        device_id: &str,
        range: Option<TimeRange>,
    ) -> Result<ReadingSummary> {
        let inner = self.inner.read().await;
        let rows: Vec<_> = inner
            .device_readings(device_id)
            .filter(|r| range.map_or(true, |w| w.contains(r.timestamp)))
            .cloned()
            .collect();
        Ok(summarize(&rows))
    }

    async fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.readings.len();
        inner.readings.retain(|r| r.timestamp >= cutoff);
        Ok((before - inner.readings.len()) as u64)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        let mut inner = self.inner.write().await;
        if inner.devices.values().any(|d| d.device_id == device.device_id) {
            return Err(Error::Duplicate("Device ID already exists".to_owned()));
        }
        if inner.devices.values().any(|d| d.api_key == device.api_key) {
            return Err(Error::Duplicate("API key already in use".to_owned()));
        }

        inner.next_device_id += 1;
        let now = Utc::now();
        let created = Device {
            id: inner.next_device_id,
            device_id: device.device_id,
            name: device.name,
            description: device.description,
            location: device.location,
            api_key: device.api_key,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.devices.insert(created.id, created.clone());
        Ok(created)
    }

    async fn device_by_id(&self, id: i64) -> Result<Device> {
        self.inner
            .read()
            .await
            .devices
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Device not found"))
    }

    async fn device_by_device_id(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self
            .inner
            .read()
            .await
            .devices
            .values()
            .find(|d| d.device_id == device_id)
            .cloned())
    }

    async fn active_device_by_api_key(&self, api_key: &str) -> Result<Option<Device>> {
        Ok(self
            .inner
            .read()
            .await
            .devices
            .values()
            .find(|d| d.is_active && d.api_key == api_key)
            .cloned())
    }

    async fn list_devices(&self, limit: i64, offset: i64) -> Result<Vec<DeviceOverview>> {
        let mut devices: Vec<Device> = self.inner.read().await.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let mut page = Vec::new();
        for device in devices
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
        {
            let latest = self.latest_reading(&device.device_id).await?;
            page.push(DeviceOverview::new(device, latest.as_ref()));
        }
        Ok(page)
    }

    async fn count_devices(&self) -> Result<i64> {
        Ok(self.inner.read().await.devices.len() as i64)
    }

    async fn update_device(&self, id: i64, patch: &DevicePatch) -> Result<Device> {
        let mut inner = self.inner.write().await;
        let device = inner.device_mut(id)?;
        patch.apply_to(device);
        device.updated_at = Utc::now();
        Ok(device.clone())
    }

    async fn delete_device(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(device) = inner.devices.remove(&id) else {
            return Ok(false);
        };
        inner.readings.retain(|r| r.device_id != device.device_id);
        Ok(true)
    }

    async fn toggle_device_active(&self, id: i64) -> Result<Device> {
        let mut inner = self.inner.write().await;
        let device = inner.device_mut(id)?;
        device.is_active = !device.is_active;
        device.updated_at = Utc::now();
        Ok(device.clone())
    }

    async fn set_device_api_key(&self, id: i64, api_key: &str) -> Result<Device> {
        let mut inner = self.inner.write().await;
        if inner.devices.values().any(|d| d.id != id && d.api_key == api_key) {
            return Err(Error::Duplicate("API key already in use".to_owned()));
        }
        let device = inner.device_mut(id)?;
        device.api_key = api_key.to_owned();
        device.updated_at = Utc::now();
        Ok(device.clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(Error::Duplicate("Email already registered".to_owned()));
        }
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(Error::Duplicate("Username already taken".to_owned()));
        }

        inner.next_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: inner.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn user_by_id(&self, id: i64) -> Result<User> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("User not found"))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.values().find(|u| u.email == email).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.inner.read().await.users.len() as i64)
    }

    async fn set_user_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("User not found"))?;
        user.password_hash = password_hash.to_owned();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User> {
        let mut inner = self.inner.write().await;
        let taken = |other: &User| {
            other.id != id
                && (patch.email.as_ref() == Some(&other.email)
                    || patch.username.as_ref() == Some(&other.username))
        };
        if let Some(other) = inner.users.values().find(|u| taken(u)) {
            let message = if patch.email.as_ref() == Some(&other.email) {
                "Email already registered"
            } else {
                "Username already taken"
            };
            return Err(Error::Duplicate(message.to_owned()));
        }

        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("User not found"))?;
        patch.apply_to(user);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn new_device(device_id: &str, api_key: &str) -> NewDevice {
        NewDevice {
            device_id: device_id.to_owned(),
            name: device_id.to_owned(),
            description: None,
            location: None,
            api_key: api_key.to_owned(),
        }
    }

    fn reading(power: f64, energy: f64) -> NormalizedReading {
        NormalizedReading {
            voltage: 230.0,
            current: 1.0,
            power,
            energy,
            power_factor: None,
            frequency: None,
            temperature: None,
            humidity: None,
        }
    }

    #[tokio::test]
    async fn reading_for_unknown_device_is_rejected() {
        let store = MemoryStore::new();
        let err = store.insert_reading("GHOST0001", &reading(1.0, 1.0)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn get_unknown_reading_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_reading(Uuid::new_v4()).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn range_is_half_open_and_ascending() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        let t0 = Utc::now() - Duration::hours(5);
        for (i, h) in [3, 0, 1, 2].into_iter().enumerate() {
            store
                .insert_reading_at("ESP32DEV01", &reading(i as f64, 1.0), t0 + Duration::hours(h))
                .await
                .unwrap();
        }

        let range = TimeRange { start: t0, end: t0 + Duration::hours(2) };
        let rows = store.readings_in_range("ESP32DEV01", range).await.unwrap();
        let times: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![t0, t0 + Duration::hours(1)]);
    }

    #[tokio::test]
    async fn summary_total_matches_range_query() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        store.create_device(new_device("ESP32DEV02", "b")).await.unwrap();
        let t0 = Utc::now() - Duration::hours(5);
        for (h, e) in [(0, 1.25), (1, 2.5), (2, 0.125), (4, 9.0)] {
            store
                .insert_reading_at("ESP32DEV01", &reading(100.0, e), t0 + Duration::hours(h))
                .await
                .unwrap();
        }
        store.insert_reading_at("ESP32DEV02", &reading(1.0, 50.0), t0).await.unwrap();

        let range = TimeRange { start: t0, end: t0 + Duration::hours(3) };
        let rows = store.readings_in_range("ESP32DEV01", range).await.unwrap();
        let summary = store.summarize("ESP32DEV01", Some(range)).await.unwrap();
        assert_eq!(summary.reading_count, 3);
        assert_eq!(summary.total_energy, rows.iter().map(|r| r.energy).sum::<f64>());

        let lifetime = store.summarize("ESP32DEV01", None).await.unwrap();
        assert_eq!(lifetime.reading_count, 4);
    }

    #[tokio::test]
    async fn latest_is_none_without_readings() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        assert!(store.latest_reading("ESP32DEV01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_picks_newest_timestamp() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        let t0 = Utc::now();
        store.insert_reading_at("ESP32DEV01", &reading(2.0, 1.0), t0).await.unwrap();
        store
            .insert_reading_at("ESP32DEV01", &reading(1.0, 1.0), t0 - Duration::minutes(1))
            .await
            .unwrap();
        let latest = store.latest_reading("ESP32DEV01").await.unwrap().unwrap();
        assert_eq!(latest.power, 2.0);
    }

    #[tokio::test]
    async fn retention_prunes_only_old_readings() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        let now = Utc::now();
        store
            .insert_reading_at("ESP32DEV01", &reading(1.0, 1.0), now - Duration::days(400))
            .await
            .unwrap();
        store.insert_reading_at("ESP32DEV01", &reading(1.0, 1.0), now).await.unwrap();

        let removed = store.delete_readings_before(now - Duration::days(365)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.summarize("ESP32DEV01", None).await.unwrap().reading_count, 1);
    }

    #[tokio::test]
    async fn duplicates_are_rejected() {
        let store = MemoryStore::new();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        let err = store.create_device(new_device("ESP32DEV01", "b")).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
        let err = store.create_device(new_device("ESP32DEV02", "a")).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn delete_cascades_to_readings() {
        let store = MemoryStore::new();
        let d = store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        let r = store.insert_reading("ESP32DEV01", &reading(1.0, 1.0)).await.unwrap();

        assert!(store.delete_device(d.id).await.unwrap());
        assert!(store.get_reading(r.id).await.is_err());
        assert!(!store.delete_device(d.id).await.unwrap());
    }

    #[tokio::test]
    async fn inactive_device_does_not_authenticate() {
        let store = MemoryStore::new();
        let d = store.create_device(new_device("ESP32DEV01", "secret")).await.unwrap();
        assert!(store.active_device_by_api_key("secret").await.unwrap().is_some());

        let toggled = store.toggle_device_active(d.id).await.unwrap();
        assert!(!toggled.is_active);
        assert!(store.active_device_by_api_key("secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_update_rejects_another_users_identity() {
        let store = MemoryStore::new();
        let user = |name: &str| NewUser {
            username: name.to_owned(),
            email: format!("{name}@example.com"),
            password_hash: String::new(),
            role: crate::db::models::Role::User,
        };
        let ada = store.create_user(user("ada")).await.unwrap();
        store.create_user(user("bob")).await.unwrap();

        let steal = UserPatch { username: None, email: Some("bob@example.com".to_owned()) };
        let err = store.update_user(ada.id, &steal).await.unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");

        let keep = UserPatch { username: Some("ada".to_owned()), email: None };
        assert_eq!(store.update_user(ada.id, &keep).await.unwrap().username, "ada");

        let rename = UserPatch { username: Some("countess".to_owned()), email: None };
        let updated = store.update_user(ada.id, &rename).await.unwrap();
        assert_eq!(updated.username, "countess");
        assert_eq!(updated.email, "ada@example.com");
        assert!(store.user_by_username("ada").await.unwrap().is_none());

        assert!(matches!(store.update_user(99, &rename).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.create_device(new_device("ESP32DEV01", "a")).await.unwrap();
        assert_eq!(clone.count_devices().await.unwrap(), 1);
    }
}
