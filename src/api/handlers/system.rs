use axum::Json;
use chrono::Utc;

use crate::api::dto::{ok, Envelope, HealthDto};

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthDto)),
    tag = "system"
)]
pub async fn health() -> Json<Envelope<HealthDto>> {
    ok(
        "IoT Monitoring API is running",
        HealthDto {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
    )
}
