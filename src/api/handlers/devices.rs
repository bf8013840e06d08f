use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Local, Utc};
use tracing::info;

use crate::{
    api::{
        dto::{
            done, ok, ApiKeyDto, CreateDeviceRequest, CreatedDeviceDto, DeviceDetail, DeviceDto,
            DeviceList, DeviceOverviewDto, DeviceReadings, DeviceStats, DeviceStatsReport,
            Envelope, ListQuery, Pagination, PeriodQuery, RetentionQuery, RetentionResult,
            TodayWithCost, WindowWithCost,
        },
        errors::AppError,
        AppState,
    },
    auth::{self, AdminUser, AuthUser},
    db::models::{DevicePatch, NewDevice},
    errors::{Error, Result},
    telemetry::aggregate::{Period, TimeRange},
};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_RETENTION_DAYS: i64 = 365;

type Reply<T> = std::result::Result<Json<Envelope<T>>, AppError>;

/// Every device with its most recent reading, paginated by name.
#[utoipa::path(
    get,
    path = "/api/devices",
    params(ListQuery),
    responses(
        (status = 200, description = "Devices", body = DeviceList),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Reply<DeviceList> {
    let limit = parse_or(query.limit.as_deref(), DEFAULT_PAGE_SIZE, |v| v > 0).min(MAX_PAGE_SIZE);
    let offset = parse_or(query.offset.as_deref(), 0, |v| v >= 0);

    let devices = state.store.list_devices(limit, offset).await?;
    let total = state.store.count_devices().await?;

    Ok(ok(
        "Devices retrieved successfully",
        DeviceList {
            devices: devices.into_iter().map(DeviceOverviewDto::from).collect(),
            pagination: Pagination {
                total,
                limit,
                offset,
                has_more: offset + limit < total,
            },
        },
    ))
}

/// Register a device. The response is the only place its API key is shown
/// until it is regenerated.
#[utoipa::path(
    post,
    path = "/api/devices",
    request_body = CreateDeviceRequest,
    responses(
        (status = 201, description = "Device created", body = CreatedDeviceDto),
        (status = 400, description = "Missing or malformed field"),
        (status = 403, description = "Admin access required"),
        (status = 409, description = "Device ID already exists"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn create_device(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateDeviceRequest>,
) -> std::result::Result<(StatusCode, Json<Envelope<CreatedDeviceDto>>), AppError> {
    let device_id = req.device_id.map(|s| s.trim().to_owned()).unwrap_or_default();
    let name = req.name.as_deref().map(sanitize).unwrap_or_default();
    if device_id.is_empty() || name.is_empty() {
        return Err(Error::validation("Device ID and name are required").into());
    }
    if !is_valid_device_id(&device_id) {
        return Err(
            Error::validation("Device ID must be alphanumeric and 8-32 characters long").into(),
        );
    }
    if state.store.device_by_device_id(&device_id).await?.is_some() {
        return Err(Error::Duplicate("Device ID already exists".to_owned()).into());
    }

    let device = state
        .store
        .create_device(NewDevice {
            device_id,
            name,
            description: optional_text(req.description.as_deref()),
            location: optional_text(req.location.as_deref()),
            api_key: auth::generate_api_key(),
        })
        .await?;
    info!(device_id = %device.device_id, by = admin.id, "Device created");

    Ok((
        StatusCode::CREATED,
        ok("Device created successfully", CreatedDeviceDto::from(device)),
    ))
}

/// One device with lifetime statistics and today's consumption.
#[utoipa::path(
    get,
    path = "/api/devices/{id}",
    params(("id" = i64, Path, description = "Numeric device id")),
    responses(
        (status = 200, description = "Device detail", body = DeviceDetail),
        (status = 400, description = "Invalid device ID"),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Reply<DeviceDetail> {
    let device = state.store.device_by_id(parse_id(&id)?).await?;
    let lifetime = state.store.summarize(&device.device_id, None).await?;
    let today = state
        .store
        .summarize(&device.device_id, Some(TimeRange::today(&Local::now())))
        .await?;

    Ok(ok(
        "Device retrieved successfully",
        DeviceDetail {
            device: device.into(),
            stats: DeviceStats {
                lifetime: (&lifetime).into(),
                today: TodayWithCost::new(&today, state.energy_tariff),
            },
        },
    ))
}

/// Change name, description or location. `null` clears an optional field.
#[utoipa::path(
    put,
    path = "/api/devices/{id}",
    params(("id" = i64, Path, description = "Numeric device id")),
    request_body = DevicePatch,
    responses(
        (status = 200, description = "Device updated", body = DeviceDto),
        (status = 400, description = "No valid fields to update"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn update_device(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(patch): Json<DevicePatch>,
) -> Reply<DeviceDto> {
    let id = parse_id(&id)?;
    let patch = sanitize_patch(patch);
    if patch.is_empty() {
        return Err(Error::validation("No valid fields to update").into());
    }

    let device = state.store.update_device(id, &patch).await?;
    Ok(ok("Device updated successfully", DeviceDto::from(device)))
}

/// Remove a device together with all of its readings.
#[utoipa::path(
    delete,
    path = "/api/devices/{id}",
    params(("id" = i64, Path, description = "Numeric device id")),
    responses(
        (status = 200, description = "Device deleted"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn delete_device(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Reply<()> {
    let id = parse_id(&id)?;
    if !state.store.delete_device(id).await? {
        return Err(Error::not_found("Device not found").into());
    }
    info!(id, by = admin.id, "Device deleted");
    Ok(done("Device deleted successfully"))
}

#[utoipa::path(
    patch,
    path = "/api/devices/{id}/toggle-status",
    params(("id" = i64, Path, description = "Numeric device id")),
    responses(
        (status = 200, description = "Device activated or deactivated", body = DeviceDto),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn toggle_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Reply<DeviceDto> {
    let device = state.store.toggle_device_active(parse_id(&id)?).await?;
    let verb = if device.is_active { "activated" } else { "deactivated" };
    info!(device_id = %device.device_id, active = device.is_active, "Device status toggled");
    Ok(ok(format!("Device {verb} successfully"), DeviceDto::from(device)))
}

/// Issue a new API key. The old key stops working immediately.
#[utoipa::path(
    post,
    path = "/api/devices/{id}/regenerate-api-key",
    params(("id" = i64, Path, description = "Numeric device id")),
    responses(
        (status = 200, description = "New API key", body = ApiKeyDto),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Reply<ApiKeyDto> {
    let device = state
        .store
        .set_device_api_key(parse_id(&id)?, &auth::generate_api_key())
        .await?;
    info!(device_id = %device.device_id, "API key regenerated");
    Ok(ok(
        "API key regenerated successfully",
        ApiKeyDto {
            device_id: device.device_id,
            api_key: device.api_key,
        },
    ))
}

/// Raw readings over a named period, oldest first.
#[utoipa::path(
    get,
    path = "/api/devices/{id}/readings",
    params(("id" = i64, Path, description = "Numeric device id"), PeriodQuery),
    responses(
        (status = 200, description = "Readings in the period", body = DeviceReadings),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn device_readings(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Reply<DeviceReadings> {
    let device = state.store.device_by_id(parse_id(&id)?).await?;
    let period = Period::parse_lenient(query.period.as_deref().unwrap_or_default());
    let range = period.resolve(&Local::now());

    let readings = state.store.readings_in_range(&device.device_id, range).await?;

    Ok(ok(
        "Device readings retrieved successfully",
        DeviceReadings {
            device_id: device.device_id,
            device_name: device.name,
            period: period.as_str().to_owned(),
            date_range: range,
            readings: readings.into_iter().map(Into::into).collect(),
        },
    ))
}

/// Consumption over a named period, with today's snapshot alongside.
#[utoipa::path(
    get,
    path = "/api/devices/{id}/stats",
    params(("id" = i64, Path, description = "Numeric device id"), PeriodQuery),
    responses(
        (status = 200, description = "Statistics for the period", body = DeviceStatsReport),
        (status = 404, description = "Device not found"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn device_stats(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Reply<DeviceStatsReport> {
    let device = state.store.device_by_id(parse_id(&id)?).await?;
    let now = Local::now();
    let period = Period::parse_lenient(query.period.as_deref().unwrap_or_default());

    let window = state
        .store
        .summarize(&device.device_id, Some(period.resolve(&now)))
        .await?;
    let today = state
        .store
        .summarize(&device.device_id, Some(TimeRange::today(&now)))
        .await?;

    Ok(ok(
        "Device statistics retrieved successfully",
        DeviceStatsReport {
            device_id: device.device_id,
            device_name: device.name,
            period: period.as_str().to_owned(),
            stats: WindowWithCost::new(&window, state.energy_tariff),
            today: TodayWithCost::new(&today, state.energy_tariff),
        },
    ))
}

/// Drop readings of every device older than the retention window.
#[utoipa::path(
    delete,
    path = "/api/readings",
    params(RetentionQuery),
    responses(
        (status = 200, description = "Old readings removed", body = RetentionResult),
        (status = 400, description = "Retention window out of range"),
        (status = 403, description = "Admin access required"),
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn prune_readings(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<RetentionQuery>,
) -> Reply<RetentionResult> {
    let days = query.older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let cutoff = retention_cutoff(Utc::now(), days)?;
    let deleted_count = state.store.delete_readings_before(cutoff).await?;
    info!(deleted_count, days, "Old readings pruned");

    Ok(ok(
        format!("Deleted {deleted_count} readings older than {days} days"),
        RetentionResult {
            deleted_count,
            cutoff,
        },
    ))
}

/// Start of the retention window `days` before `now`.
fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days < 1 {
        return Err(Error::validation("older_than_days must be at least 1"));
    }
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| Error::validation("older_than_days is too large"))
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse().map_err(|_| Error::validation("Invalid device ID"))
}

fn parse_or(raw: Option<&str>, default: i64, accept: impl Fn(i64) -> bool) -> i64 {
    raw.and_then(|v| v.trim().parse().ok())
        .filter(|v| accept(*v))
        .unwrap_or(default)
}

/// 8 to 32 ASCII letters and digits.
fn is_valid_device_id(device_id: &str) -> bool {
    (8..=32).contains(&device_id.len()) && device_id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Trim and strip angle brackets from user-supplied text.
fn sanitize(raw: &str) -> String {
    raw.trim().replace(['<', '>'], "")
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(sanitize).filter(|s| !s.is_empty())
}

/// A blank name is ignored; a blank description or location clears it.
fn sanitize_patch(patch: DevicePatch) -> DevicePatch {
    DevicePatch {
        name: optional_text(patch.name.as_deref()),
        description: patch.description.map(|d| optional_text(d.as_deref())),
        location: patch.location.map(|l| optional_text(l.as_deref())),
    }
}
