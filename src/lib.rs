pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod telemetry;
