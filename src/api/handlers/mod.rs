pub mod auth;
pub mod devices;
pub mod iot;
pub mod system;

use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use super::dto::*;
use crate::{
    db::models::{DevicePatch, Role, UserPatch},
    ingest::service::{RejectedReading, SubmittedReading},
    telemetry::{
        aggregate::{LifetimeStats, TimeRange, TodayStats, WindowStats},
        alerts::{Alert, AlertType, Severity},
        normalize::RawReading,
    },
};

// ---------------------------------------------------------------------------
// OpenAPI document (served by api/mod.rs)
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        iot::submit_reading,
        iot::submit_bulk,
        iot::device_status,
        iot::device_config,
        iot::heartbeat,
        auth::register,
        auth::login,
        auth::profile,
        auth::update_profile,
        auth::change_password,
        devices::list_devices,
        devices::create_device,
        devices::get_device,
        devices::update_device,
        devices::delete_device,
        devices::toggle_status,
        devices::regenerate_api_key,
        devices::device_readings,
        devices::device_stats,
        devices::prune_readings,
        system::health,
    ),
    components(schemas(
        RawReading, BulkReadingsRequest, ReadingAccepted, BulkAccepted,
        SubmittedReading, RejectedReading, Alert, AlertType, Severity,
        DeviceStatus, StatusDevice, DeviceConfig, FirmwareConfig, ServerEndpoints,
        AlertThresholds, Heartbeat,
        RegisterRequest, LoginRequest, ChangePasswordRequest, UserDto, ProfileDto,
        AuthSession, Role, UserPatch,
        DeviceDto, CreatedDeviceDto, ApiKeyDto, DeviceOverviewDto, DeviceList, Pagination,
        CreateDeviceRequest, DevicePatch, DeviceDetail, DeviceStats, DeviceReadings,
        DeviceStatsReport, ReadingDto, TodayWithCost, WindowWithCost, TodayStats,
        WindowStats, LifetimeStats, TimeRange, RetentionResult, HealthDto,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "iot", description = "Endpoints called by monitoring devices"),
        (name = "auth", description = "User registration and sessions"),
        (name = "devices", description = "Device management and statistics"),
        (name = "system", description = "Service health"),
    ),
    info(
        title = "Power Monitor API",
        version = "0.1.0",
        description = "Ingestion, alerting and statistics for ESP32 power monitors"
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-api-key"))),
        );
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}
