use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::normalize::NormalizedReading;

pub const HIGH_POWER_THRESHOLD: f64 = 5000.0;
pub const LOW_VOLTAGE_THRESHOLD: f64 = 200.0;
pub const HIGH_VOLTAGE_THRESHOLD: f64 = 250.0;
pub const HIGH_TEMPERATURE_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighPower,
    VoltageAnomaly,
    HighTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl AlertType {
    pub fn severity(self) -> Severity {
        match self {
            AlertType::HighPower | AlertType::HighTemperature => Severity::High,
            AlertType::VoltageAnomaly => Severity::Medium,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertType::HighPower => "high_power",
            AlertType::VoltageAnomaly => "voltage_anomaly",
            AlertType::HighTemperature => "high_temperature",
        })
    }
}

/// A threshold breach derived from a single reading. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub severity: Severity,
}

impl Alert {
    fn new(alert_type: AlertType, message: String) -> Self {
        Self {
            alert_type,
            message,
            severity: alert_type.severity(),
        }
    }
}

/// Derive alerts from a normalized reading.
///
/// Checks run in a fixed order (power, voltage, temperature) and the output
/// preserves it.
pub fn evaluate(reading: &NormalizedReading) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if reading.power > HIGH_POWER_THRESHOLD {
        alerts.push(Alert::new(
            AlertType::HighPower,
            format!("High power consumption detected: {}W", reading.power),
        ));
    }

    if reading.voltage < LOW_VOLTAGE_THRESHOLD || reading.voltage > HIGH_VOLTAGE_THRESHOLD {
        alerts.push(Alert::new(
            AlertType::VoltageAnomaly,
            format!("Voltage out of normal range: {}V", reading.voltage),
        ));
    }

    if let Some(t) = reading.temperature.filter(|t| *t > HIGH_TEMPERATURE_THRESHOLD) {
        alerts.push(Alert::new(
            AlertType::HighTemperature,
            format!("High temperature detected: {t}°C"),
        ));
    }

    alerts
}
