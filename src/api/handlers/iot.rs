use axum::{extract::State, http::StatusCode, Json};
use chrono::{Local, Utc};
use serde_json::Value;

use crate::{
    api::{
        dto::{
            ok, AlertThresholds, BulkAccepted, BulkReadingsRequest, DeviceConfig, DeviceStatus,
            Envelope, FirmwareConfig, Heartbeat, ReadingAccepted, ServerEndpoints, StatusDevice,
            TodayWithCost,
        },
        errors::AppError,
        AppState,
    },
    auth::AuthDevice,
    telemetry::{
        aggregate::TimeRange,
        alerts::{
            HIGH_POWER_THRESHOLD, HIGH_TEMPERATURE_THRESHOLD, HIGH_VOLTAGE_THRESHOLD,
            LOW_VOLTAGE_THRESHOLD,
        },
        normalize::RawReading,
    },
};

type Created<T> = (StatusCode, Json<Envelope<T>>);

/// Submit one reading. Alerts are returned, never stored.
#[utoipa::path(
    post,
    path = "/api/iot/readings",
    request_body = RawReading,
    responses(
        (status = 201, description = "Reading stored", body = ReadingAccepted),
        (status = 400, description = "Field missing, mistyped or out of range"),
        (status = 401, description = "Missing, unknown or inactive API key"),
        (status = 500, description = "Internal server error"),
    ),
    security(("api_key" = [])),
    tag = "iot"
)]
pub async fn submit_reading(
    State(state): State<AppState>,
    AuthDevice(device): AuthDevice,
    Json(payload): Json<Value>,
) -> Result<Created<ReadingAccepted>, AppError> {
    let ingested = state.ingest.submit(&device, &payload).await?;

    Ok((
        StatusCode::CREATED,
        ok(
            "Reading submitted successfully",
            ReadingAccepted {
                reading_id: ingested.reading.id,
                timestamp: ingested.reading.timestamp,
                alerts: ingested.alerts,
            },
        ),
    ))
}

/// Submit up to 100 readings. Each element succeeds or fails on its own;
/// any failure turns the response into 207 Multi-Status.
#[utoipa::path(
    post,
    path = "/api/iot/readings/bulk",
    request_body = BulkReadingsRequest,
    responses(
        (status = 201, description = "Every reading stored", body = BulkAccepted),
        (status = 207, description = "At least one reading rejected", body = BulkAccepted),
        (status = 400, description = "Empty or oversized batch"),
        (status = 401, description = "Missing, unknown or inactive API key"),
    ),
    security(("api_key" = [])),
    tag = "iot"
)]
pub async fn submit_bulk(
    State(state): State<AppState>,
    AuthDevice(device): AuthDevice,
    Json(body): Json<Value>,
) -> Result<Created<BulkAccepted>, AppError> {
    let readings = body
        .get("readings")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let outcome = state.ingest.submit_bulk(&device, readings).await?;

    let all_ok = outcome.errors.is_empty();
    let status = if all_ok {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    let envelope = Envelope {
        success: all_ok,
        message: format!(
            "Bulk submission completed. {} readings submitted successfully.",
            outcome.submitted.len()
        ),
        data: Some(BulkAccepted {
            submitted_count: outcome.submitted.len(),
            error_count: outcome.errors.len(),
            submitted_readings: outcome.submitted,
            errors: outcome.errors,
        }),
    };
    Ok((status, Json(envelope)))
}

/// The calling device's identity, latest reading and today's consumption.
#[utoipa::path(
    get,
    path = "/api/iot/status",
    responses(
        (status = 200, description = "Device status", body = DeviceStatus),
        (status = 401, description = "Missing, unknown or inactive API key"),
    ),
    security(("api_key" = [])),
    tag = "iot"
)]
pub async fn device_status(
    State(state): State<AppState>,
    AuthDevice(device): AuthDevice,
) -> Result<Json<Envelope<DeviceStatus>>, AppError> {
    let latest = state.store.latest_reading(&device.device_id).await?;
    let today = state
        .store
        .summarize(&device.device_id, Some(TimeRange::today(&Local::now())))
        .await?;

    Ok(ok(
        "Device status retrieved successfully",
        DeviceStatus {
            device: StatusDevice {
                id: device.device_id,
                name: device.name,
                location: device.location,
                is_active: device.is_active,
            },
            latest_reading: latest.map(Into::into),
            today_stats: TodayWithCost::new(&today, state.energy_tariff),
            server_time: Utc::now(),
        },
    ))
}

/// Operating parameters for the firmware.
#[utoipa::path(
    get,
    path = "/api/iot/config",
    responses(
        (status = 200, description = "Device configuration", body = DeviceConfig),
        (status = 401, description = "Missing, unknown or inactive API key"),
    ),
    security(("api_key" = [])),
    tag = "iot"
)]
pub async fn device_config(AuthDevice(device): AuthDevice) -> Json<Envelope<DeviceConfig>> {
    ok(
        "Configuration retrieved successfully",
        DeviceConfig {
            device_id: device.device_id,
            config: firmware_config(),
            last_updated: Utc::now(),
        },
    )
}

/// Heartbeat. Nothing is recorded.
#[utoipa::path(
    post,
    path = "/api/iot/health",
    responses(
        (status = 200, description = "Device is online", body = Heartbeat),
        (status = 401, description = "Missing, unknown or inactive API key"),
    ),
    security(("api_key" = [])),
    tag = "iot"
)]
pub async fn heartbeat(AuthDevice(device): AuthDevice) -> Json<Envelope<Heartbeat>> {
    ok(
        "Device health check successful",
        Heartbeat {
            device_id: device.device_id,
            status: "online".to_owned(),
            timestamp: Utc::now(),
            server_status: "operational".to_owned(),
        },
    )
}

fn firmware_config() -> FirmwareConfig {
    FirmwareConfig {
        reading_interval: 30,
        max_voltage: HIGH_VOLTAGE_THRESHOLD,
        min_voltage: LOW_VOLTAGE_THRESHOLD,
        max_current: 50.0,
        max_power: 10_000.0,
        temperature_threshold: HIGH_TEMPERATURE_THRESHOLD,
        humidity_threshold: 90.0,
        server_endpoints: ServerEndpoints {
            submit_reading: "/api/iot/readings".to_owned(),
            get_status: "/api/iot/status".to_owned(),
            get_config: "/api/iot/config".to_owned(),
        },
        alerts: AlertThresholds {
            high_power_threshold: HIGH_POWER_THRESHOLD,
            low_voltage_threshold: LOW_VOLTAGE_THRESHOLD,
            high_voltage_threshold: HIGH_VOLTAGE_THRESHOLD,
            high_temperature_threshold: HIGH_TEMPERATURE_THRESHOLD,
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::api::test_support::{seed_device, server, RequestExt};

    fn nominal() -> Value {
        json!({"voltage": 230, "current": 5.2, "power": 1196, "energy": 12.345})
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_api_key_is_unauthorized() {
        let (server, _) = server();
        let resp = server.post("/api/iot/readings").json(&nominal()).await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = resp.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "API key required");
    }

    #[tokio::test]
    async fn inactive_device_is_rejected_like_an_unknown_key() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;
        state.store.toggle_device_active(device.id).await.unwrap();

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&nominal())
            .await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(resp.json::<Value>()["message"], "Invalid API key or device inactive");

        let resp = server
            .post("/api/iot/readings")
            .api_key("nope")
            .json(&nominal())
            .await;
        assert_eq!(resp.json::<Value>()["message"], "Invalid API key or device inactive");
    }

    // -----------------------------------------------------------------------
    // POST /api/iot/readings
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn nominal_reading_is_created_without_alerts() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&nominal())
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Reading submitted successfully");
        assert!(body["data"]["reading_id"].is_string());
        assert!(body["data"].get("alerts").is_none());

        let summary = state.store.summarize("ESP32DEV01", None).await.unwrap();
        assert_eq!(summary.reading_count, 1);
    }

    #[tokio::test]
    async fn unrepresentable_energy_is_a_bad_request() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&json!({"voltage": 230, "current": 1, "power": 230, "energy": 1e306}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.json::<Value>()["message"],
            "Invalid energy value (0-999999999.999kWh)"
        );

        let summary = state.store.summarize("ESP32DEV01", None).await.unwrap();
        assert_eq!(summary.reading_count, 0);
    }

    #[tokio::test]
    async fn voltage_outside_the_band_reports_one_anomaly() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&json!({"voltage": 260, "current": 1, "power": 260, "energy": 1}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let alerts = resp.json::<Value>()["data"]["alerts"].clone();
        assert_eq!(
            alerts,
            json!([{
                "type": "voltage_anomaly",
                "message": "Voltage out of normal range: 260V",
                "severity": "medium"
            }])
        );
    }

    #[tokio::test]
    async fn high_power_reports_one_alert() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&json!({"voltage": 230, "current": 1, "power": 6000, "energy": 1}))
            .await;
        let alerts = resp.json::<Value>()["data"]["alerts"].clone();
        let alerts = alerts.as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["type"], "high_power");
        assert_eq!(alerts[0]["severity"], "high");
    }

    #[tokio::test]
    async fn out_of_range_reading_is_rejected_and_not_stored() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings")
            .api_key(&device.api_key)
            .json(&json!({"voltage": 230, "current": 101, "power": 1, "energy": 1}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<Value>()["message"], "Invalid current value (0-100A)");

        let summary = state.store.summarize("ESP32DEV01", None).await.unwrap();
        assert_eq!(summary.reading_count, 0);
    }

    // -----------------------------------------------------------------------
    // POST /api/iot/readings/bulk
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn bulk_all_valid_is_created() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server
            .post("/api/iot/readings/bulk")
            .api_key(&device.api_key)
            .json(&json!({"readings": [nominal(), nominal(), nominal()]}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["submitted_count"], 3);
        assert_eq!(body["data"]["error_count"], 0);
        assert!(body["data"].get("errors").is_none());
    }

    #[tokio::test]
    async fn bulk_with_some_invalid_is_multi_status() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let readings = json!([
            nominal(),
            {"voltage": "x"},
            nominal(),
            {"voltage": 900, "current": 1, "power": 1, "energy": 1}
        ]);
        let resp = server
            .post("/api/iot/readings/bulk")
            .api_key(&device.api_key)
            .json(&json!({ "readings": readings }))
            .await;
        resp.assert_status(StatusCode::MULTI_STATUS);
        let body: Value = resp.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["submitted_count"], 2);
        assert_eq!(body["data"]["error_count"], 2);
        assert_eq!(body["data"]["errors"][0]["index"], 1);
        assert_eq!(body["data"]["errors"][1]["index"], 3);
        assert_eq!(body["data"]["submitted_readings"][1]["index"], 2);
        assert_eq!(
            body["message"],
            "Bulk submission completed. 2 readings submitted successfully."
        );
    }

    #[tokio::test]
    async fn bulk_rejects_empty_missing_and_oversized_batches() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        for body in [
            json!({"readings": []}),
            json!({}),
            json!({"readings": "nope"}),
        ] {
            let resp = server
                .post("/api/iot/readings/bulk")
                .api_key(&device.api_key)
                .json(&body)
                .await;
            resp.assert_status(StatusCode::BAD_REQUEST);
            assert_eq!(
                resp.json::<Value>()["message"],
                "Readings array is required and must not be empty"
            );
        }

        let too_many: Vec<Value> = (0..101).map(|_| nominal()).collect();
        let resp = server
            .post("/api/iot/readings/bulk")
            .api_key(&device.api_key)
            .json(&json!({ "readings": too_many }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);

        let summary = state.store.summarize("ESP32DEV01", None).await.unwrap();
        assert_eq!(summary.reading_count, 0);
    }

    // -----------------------------------------------------------------------
    // Status, config, heartbeat
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn status_without_readings_has_zeroed_today_stats() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let resp = server.get("/api/iot/status").api_key(&device.api_key).await;
        resp.assert_status_ok();
        let data = resp.json::<Value>()["data"].clone();
        assert_eq!(data["device"]["id"], "ESP32DEV01");
        assert!(data["latest_reading"].is_null());
        let today = &data["today_stats"];
        for field in ["readings_count", "total_energy", "avg_power", "peak_power", "min_power"] {
            assert_eq!(today[field].as_f64(), Some(0.0), "{field}");
        }
        assert_eq!(today["estimated_cost"].as_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn status_reports_latest_reading_and_today_cost() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;
        for energy in [1.0, 2.0] {
            server
                .post("/api/iot/readings")
                .api_key(&device.api_key)
                .json(&json!({"voltage": 230, "current": 1, "power": 230, "energy": energy}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let data = server.get("/api/iot/status").api_key(&device.api_key).await.json::<Value>()
            ["data"]
            .clone();
        assert_eq!(data["latest_reading"]["energy"].as_f64(), Some(2.0));
        assert_eq!(data["today_stats"]["readings_count"], 2);
        let cost = data["today_stats"]["estimated_cost"].as_f64().unwrap();
        assert!((cost - 0.36).abs() < 1e-9);
    }

    #[tokio::test]
    async fn config_and_heartbeat_echo_the_device() {
        let (server, state) = server();
        let device = seed_device(&state, "ESP32DEV01").await;

        let config = server.get("/api/iot/config").api_key(&device.api_key).await.json::<Value>();
        assert_eq!(config["data"]["device_id"], "ESP32DEV01");
        assert_eq!(config["data"]["config"]["reading_interval"], 30);
        let alerts = &config["data"]["config"]["alerts"];
        assert_eq!(alerts["high_power_threshold"].as_f64(), Some(5000.0));

        let beat = server.post("/api/iot/health").api_key(&device.api_key).await;
        beat.assert_status_ok();
        assert_eq!(beat.json::<Value>()["data"]["status"], "online");
    }
}
