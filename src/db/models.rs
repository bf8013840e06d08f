use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A registered power-monitoring device.
///
/// `device_id` is the externally assigned identity that readings reference;
/// `id` is the surrogate key used by the management API.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub api_key: String,
}

/// Partial update of the mutable descriptive fields of a device.
///
/// `description` and `location` are tri-state: `None` leaves the column
/// untouched, `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
pub struct DevicePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.location.is_none()
    }

    /// Merge the patch into `device` field by field.
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(name) = &self.name {
            device.name = name.clone();
        }
        if let Some(description) = &self.description {
            device.description = description.clone();
        }
        if let Some(location) = &self.location {
            device.location = location.clone();
        }
    }
}

/// A device row joined with its most recent reading, if any.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeviceOverview {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub device: Device,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
    pub last_reading_time: Option<DateTime<Utc>>,
}

impl DeviceOverview {
    pub fn new(device: Device, latest: Option<&PowerReading>) -> Self {
        Self {
            device,
            voltage: latest.map(|r| r.voltage),
            current: latest.map(|r| r.current),
            power: latest.map(|r| r.power),
            energy: latest.map(|r| r.energy),
            last_reading_time: latest.map(|r| r.timestamp),
        }
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One persisted telemetry sample. Values are stored already normalized.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PowerReading {
    pub id: Uuid,
    pub device_id: String,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub power_factor: Option<f64>,
    pub frequency: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[sqlx(rename = "recorded_at")]
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Mirrors the `user_role` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::User => "user",
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Self-service profile change. A `None` field keeps its current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
pub struct UserPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
