pub mod dto;
pub mod errors;
pub mod handlers;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{auth::SessionSigner, config::Config, db::store::Store, ingest::IngestService};

use handlers::{auth, devices, iot, system, ApiDoc};

/// Request-independent handles shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ingest: IngestService,
    pub sessions: SessionSigner,
    /// Currency units per kWh used for cost estimates.
    pub energy_tariff: f64,
    pub password_iterations: u32,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            ingest: IngestService::new(store.clone(), config.optional_fields),
            sessions: SessionSigner::new(&config.session_secret, config.session_ttl_hours),
            energy_tariff: config.energy_tariff,
            password_iterations: config.password_iterations,
            store,
        }
    }
}

impl FromRef<AppState> for Arc<dyn Store> {
    fn from_ref(state: &AppState) -> Arc<dyn Store> {
        state.store.clone()
    }
}

impl FromRef<AppState> for SessionSigner {
    fn from_ref(state: &AppState) -> SessionSigner {
        state.sessions.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        // firmware
        .route("/api/iot/readings", post(iot::submit_reading))
        .route("/api/iot/readings/bulk", post(iot::submit_bulk))
        .route("/api/iot/status", get(iot::device_status))
        .route("/api/iot/config", get(iot::device_config))
        .route("/api/iot/health", post(iot::heartbeat))
        // users
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/profile", get(auth::profile).put(auth::update_profile))
        .route("/api/auth/change-password", put(auth::change_password))
        // management
        .route("/api/devices", get(devices::list_devices).post(devices::create_device))
        .route(
            "/api/devices/{id}",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/api/devices/{id}/toggle-status", patch(devices::toggle_status))
        .route("/api/devices/{id}/regenerate-api-key", post(devices::regenerate_api_key))
        .route("/api/devices/{id}/readings", get(devices::device_readings))
        .route("/api/devices/{id}/stats", get(devices::device_stats))
        .route("/api/readings", delete(devices::prune_readings))
        .route("/api/health", get(system::health))
        .with_state(state)
        .split_for_parts();

    router
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
        .layer(TraceLayer::new_for_http())
}

/// Browser access for the dashboard origin. An unparsable origin disables CORS.
pub fn cors(origin: &str) -> Option<CorsLayer> {
    match HeaderValue::from_str(origin) {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
            None
        }
    }
}
