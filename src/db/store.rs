use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::models::{
        Device, DeviceOverview, DevicePatch, NewDevice, NewUser, PowerReading, User, UserPatch,
    },
    errors::Result,
    telemetry::{
        aggregate::{ReadingSummary, TimeRange},
        normalize::NormalizedReading,
    },
};

/// Append-only log of readings per device.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading; the store assigns id and timestamp. Fails with
    /// `NotFound` when `device_id` does not reference an existing device.
    async fn insert_reading(
        &self,
        device_id: &str,
        reading: &NormalizedReading,
    ) -> Result<PowerReading>;

    async fn get_reading(&self, id: Uuid) -> Result<PowerReading>;

    /// Readings inside `range`, oldest first.
    async fn readings_in_range(&self, device_id: &str, range: TimeRange)
        -> Result<Vec<PowerReading>>;

    async fn latest_reading(&self, device_id: &str) -> Result<Option<PowerReading>>;

    /// Aggregate over `range`, or over the whole history when `None`.
    async fn summarize(&self, device_id: &str, range: Option<TimeRange>)
        -> Result<ReadingSummary>;

    /// Remove readings of every device recorded before `cutoff`.
    async fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn create_device(&self, device: NewDevice) -> Result<Device>;

    async fn device_by_id(&self, id: i64) -> Result<Device>;

    async fn device_by_device_id(&self, device_id: &str) -> Result<Option<Device>>;

    /// Only active devices resolve; an inactive device's key is treated as unknown.
    async fn active_device_by_api_key(&self, api_key: &str) -> Result<Option<Device>>;

    /// Devices ordered by name, each with its most recent reading.
    async fn list_devices(&self, limit: i64, offset: i64) -> Result<Vec<DeviceOverview>>;

    async fn count_devices(&self) -> Result<i64>;

    async fn update_device(&self, id: i64, patch: &DevicePatch) -> Result<Device>;

    /// Returns `false` when nothing was deleted. Readings cascade.
    async fn delete_device(&self, id: i64) -> Result<bool>;

    async fn toggle_device_active(&self, id: i64) -> Result<Device>;

    async fn set_device_api_key(&self, id: i64, api_key: &str) -> Result<Device>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn user_by_id(&self, id: i64) -> Result<User>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn count_users(&self) -> Result<i64>;

    async fn set_user_password(&self, id: i64, password_hash: &str) -> Result<()>;

    /// Fails with `Duplicate` when the new username or email belongs to
    /// another user.
    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User>;
}

/// The single persistence handle shared by every request.
#[async_trait]
pub trait Store: ReadingStore + DeviceStore + UserStore {
    /// Release underlying connections. Called once at shutdown.
    async fn close(&self);
}
