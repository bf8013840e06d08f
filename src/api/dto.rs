use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    db::models::{Device, DeviceOverview, PowerReading, Role, User},
    ingest::service::{RejectedReading, SubmittedReading},
    telemetry::{
        aggregate::{LifetimeStats, ReadingSummary, TimeRange, TodayStats, WindowStats},
        alerts::Alert,
        cost::estimate_cost,
        normalize::RawReading,
    },
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wrapper around every successful response body.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: message.into(),
        data: Some(data),
    })
}

pub fn done(message: impl Into<String>) -> Json<Envelope<()>> {
    Json(Envelope {
        success: true,
        message: message.into(),
        data: None,
    })
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A device as shown to users. The API key is never part of it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceDto {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Device> for DeviceDto {
    fn from(d: Device) -> Self {
        Self {
            id: d.id,
            device_id: d.device_id,
            name: d.name,
            description: d.description,
            location: d.location,
            is_active: d.is_active,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// Returned once, on creation, so the key can be flashed onto the device.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedDeviceDto {
    #[serde(flatten)]
    pub device: DeviceDto,
    pub api_key: String,
}

impl From<Device> for CreatedDeviceDto {
    fn from(mut d: Device) -> Self {
        let api_key = std::mem::take(&mut d.api_key);
        Self {
            device: d.into(),
            api_key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyDto {
    pub device_id: String,
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceOverviewDto {
    #[serde(flatten)]
    pub device: DeviceDto,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
    pub last_reading_time: Option<DateTime<Utc>>,
}

impl From<DeviceOverview> for DeviceOverviewDto {
    fn from(o: DeviceOverview) -> Self {
        Self {
            device: o.device.into(),
            voltage: o.voltage,
            current: o.current,
            power: o.power,
            energy: o.energy,
            last_reading_time: o.last_reading_time,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceList {
    pub devices: Vec<DeviceOverviewDto>,
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    /// 8–32 ASCII letters and digits.
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page size, default 50.
    pub limit: Option<String>,
    /// Rows to skip, default 0.
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PeriodQuery {
    /// One of `today`, `week`, `month`, `year`. Anything else means `today`.
    pub period: Option<String>,
}

// ---------------------------------------------------------------------------
// Readings and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
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
    pub timestamp: DateTime<Utc>,
}

impl From<PowerReading> for ReadingDto {
    fn from(r: PowerReading) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            voltage: r.voltage,
            current: r.current,
            power: r.power,
            energy: r.energy,
            power_factor: r.power_factor,
            frequency: r.frequency,
            temperature: r.temperature,
            humidity: r.humidity,
            timestamp: r.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TodayWithCost {
    #[serde(flatten)]
    pub stats: TodayStats,
    pub estimated_cost: f64,
}

impl TodayWithCost {
    pub fn new(summary: &ReadingSummary, tariff: f64) -> Self {
        Self {
            stats: summary.into(),
            estimated_cost: estimate_cost(summary.total_energy, tariff),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WindowWithCost {
    #[serde(flatten)]
    pub stats: WindowStats,
    pub estimated_cost: f64,
}

impl WindowWithCost {
    pub fn new(summary: &ReadingSummary, tariff: f64) -> Self {
        Self {
            stats: summary.into(),
            estimated_cost: estimate_cost(summary.total_energy, tariff),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceStats {
    #[serde(flatten)]
    pub lifetime: LifetimeStats,
    pub today: TodayWithCost,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceDetail {
    #[serde(flatten)]
    pub device: DeviceDto,
    pub stats: DeviceStats,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceReadings {
    pub device_id: String,
    pub device_name: String,
    pub period: String,
    pub date_range: TimeRange,
    pub readings: Vec<ReadingDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatsReport {
    pub device_id: String,
    pub device_name: String,
    pub period: String,
    pub stats: WindowWithCost,
    pub today: TodayWithCost,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RetentionQuery {
    /// Readings older than this many days are removed. Default 365.
    pub older_than_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RetentionResult {
    pub deleted_count: u64,
    pub cutoff: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Device-facing (IoT) payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingAccepted {
    pub reading_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<Alert>,
}

/// Request body of the bulk endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkReadingsRequest {
    pub readings: Vec<RawReading>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkAccepted {
    pub submitted_count: usize,
    pub error_count: usize,
    pub submitted_readings: Vec<SubmittedReading>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RejectedReading>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusDevice {
    /// External device identifier.
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    pub device: StatusDevice,
    pub latest_reading: Option<ReadingDto>,
    pub today_stats: TodayWithCost,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServerEndpoints {
    pub submit_reading: String,
    pub get_status: String,
    pub get_config: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertThresholds {
    pub high_power_threshold: f64,
    pub low_voltage_threshold: f64,
    pub high_voltage_threshold: f64,
    pub high_temperature_threshold: f64,
}

/// Operating parameters pushed to the firmware.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FirmwareConfig {
    /// Seconds between readings.
    pub reading_interval: u32,
    pub max_voltage: f64,
    pub min_voltage: f64,
    pub max_current: f64,
    pub max_power: f64,
    pub temperature_threshold: f64,
    pub humidity_threshold: f64,
    pub server_endpoints: ServerEndpoints,
    pub alerts: AlertThresholds,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceConfig {
    pub device_id: String,
    pub config: FirmwareConfig,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Heartbeat {
    pub device_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub server_status: String,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    #[serde(default, alias = "currentPassword")]
    pub current_password: Option<String>,
    #[serde(default, alias = "newPassword")]
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserDto {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileDto {
    #[serde(flatten)]
    pub user: UserDto,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for ProfileDto {
    fn from(u: &User) -> Self {
        Self {
            user: u.into(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSession {
    pub user: UserDto,
    pub token: String,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthDto {
    pub timestamp: DateTime<Utc>,
    pub version: String,
}
