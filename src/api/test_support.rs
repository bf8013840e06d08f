use std::{sync::Arc, time::Duration};

use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};

use super::{router, AppState};
use crate::{
    auth::{self, API_KEY_HEADER},
    config::Config,
    db::{
        memory::MemoryStore,
        models::{Device, NewDevice, NewUser, Role, User},
    },
    telemetry::normalize::OptionalFields,
};

pub const PASSWORD: &str = "Passw0rdOk";
const FAST_ITERATIONS: u32 = 1_000;

pub fn config() -> Config {
    Config {
        database_url: "postgres://unused".to_owned(),
        server_host: "127.0.0.1".to_owned(),
        server_port: 0,
        db_max_connections: 1,
        store_timeout: Duration::from_secs(1),
        session_secret: "test-session-secret".to_owned(),
        session_ttl_hours: 1,
        password_iterations: FAST_ITERATIONS,
        energy_tariff: 0.12,
        optional_fields: OptionalFields::ZeroAsAbsent,
        cors_origin: "http://localhost:3000".to_owned(),
    }
}

/// A server over a fresh in-memory store, plus the shared state for seeding.
pub fn server() -> (TestServer, AppState) {
    server_over(MemoryStore::new())
}

/// Like [`server`], for tests that need to backdate readings in `store`.
pub fn server_over(store: MemoryStore) -> (TestServer, AppState) {
    let state = AppState::new(Arc::new(store), &config());
    (TestServer::new(router(state.clone())).unwrap(), state)
}

pub async fn seed_device(state: &AppState, device_id: &str) -> Device {
    state
        .store
        .create_device(NewDevice {
            device_id: device_id.to_owned(),
            name: format!("{device_id} panel"),
            description: None,
            location: Some("Garage".to_owned()),
            api_key: auth::generate_api_key(),
        })
        .await
        .unwrap()
}

pub async fn seed_user(state: &AppState, username: &str, role: Role) -> User {
    state
        .store
        .create_user(NewUser {
            username: username.to_owned(),
            email: format!("{username}@example.com"),
            password_hash: auth::hash_password(PASSWORD, FAST_ITERATIONS).unwrap(),
            role,
        })
        .await
        .unwrap()
}

/// Session token of a freshly seeded user with `role`.
pub async fn token_for(state: &AppState, username: &str, role: Role) -> String {
    let user = seed_user(state, username, role).await;
    state.sessions.issue(user.id)
}

pub trait RequestExt {
    fn api_key(self, key: &str) -> Self;
    fn bearer(self, token: &str) -> Self;
}

impl RequestExt for TestRequest {
    fn api_key(self, key: &str) -> Self {
        self.add_header(
            HeaderName::from_static(API_KEY_HEADER),
            HeaderValue::from_str(key).unwrap(),
        )
    }

    fn bearer(self, token: &str) -> Self {
        self.add_header(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        )
    }
}
