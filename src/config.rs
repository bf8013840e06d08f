use std::time::Duration;

use anyhow::{Context, Result};

use crate::telemetry::{cost::DEFAULT_TARIFF, normalize::OptionalFields};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub db_max_connections: u32,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    /// HMAC key used to sign user session tokens.
    pub session_secret: String,
    pub session_ttl_hours: i64,
    /// PBKDF2 rounds for newly hashed passwords.
    pub password_iterations: u32,
    /// Currency units per kWh.
    pub energy_tariff: f64,
    /// Whether a present `0` in an optional reading field counts as absent.
    pub optional_fields: OptionalFields,
    pub cors_origin: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            db_max_connections: optional("DB_MAX_CONNECTIONS", "10")
                .parse()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            store_timeout: Duration::from_millis(
                optional("STORE_TIMEOUT_MS", "5000")
                    .parse()
                    .context("STORE_TIMEOUT_MS must be a positive integer")?,
            ),
            session_secret: required("SESSION_SECRET")?,
            session_ttl_hours: optional("SESSION_TTL_HOURS", "168")
                .parse()
                .context("SESSION_TTL_HOURS must be an integer")?,
            password_iterations: parse_iterations(&optional(
                "PASSWORD_HASH_ITERATIONS",
                "200000",
            ))?,
            energy_tariff: parse_tariff(&optional("ENERGY_TARIFF", &DEFAULT_TARIFF.to_string()))?,
            optional_fields: parse_optional_fields(&optional("ZERO_OPTIONAL_AS_ABSENT", "true"))?,
            cors_origin: optional("CORS_ORIGIN", "http://localhost:3000"),
        })
    }
}

fn parse_tariff(raw: &str) -> Result<f64> {
    let tariff: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("ENERGY_TARIFF must be a number, got: {raw:?}"))?;
    anyhow::ensure!(
        tariff.is_finite() && tariff >= 0.0,
        "ENERGY_TARIFF must be a non-negative number, got: {raw:?}"
    );
    Ok(tariff)
}

fn parse_iterations(raw: &str) -> Result<u32> {
    let iterations: u32 = raw.trim().parse().with_context(|| {
        format!("PASSWORD_HASH_ITERATIONS must be a positive integer, got: {raw:?}")
    })?;
    anyhow::ensure!(iterations > 0, "PASSWORD_HASH_ITERATIONS must be at least 1");
    Ok(iterations)
}

fn parse_optional_fields(raw: &str) -> Result<OptionalFields> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(OptionalFields::ZeroAsAbsent),
        "false" | "0" | "no" => Ok(OptionalFields::Presence),
        other => Err(anyhow::anyhow!(
            "ZERO_OPTIONAL_AS_ABSENT must be true or false, got: {other:?}"
        )),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
