//! Validation and decimal normalization of raw device telemetry.
//!
//! Rounding happens exactly once, here, before a reading is persisted.
//! Two precisions are used:
//!
//! | Field                                         | Rounding          |
//! |-----------------------------------------------|-------------------|
//! | voltage, frequency, temperature, humidity     | [`round2`]        |
//! | current, power, energy, power_factor          | [`round3`]        |
//!
//! [`round3`] is `round2(v * 1000) / 1000`, which keeps up to five
//! fractional digits rather than three. Stored data already follows this
//! composition, so it is reproduced as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::errors::{Error, Result};

pub const VOLTAGE_MAX: f64 = 500.0;
pub const CURRENT_MAX: f64 = 100.0;
pub const POWER_MAX: f64 = 50_000.0;
/// Largest value a `DECIMAL(12,3)` energy column holds.
pub const ENERGY_MAX: f64 = 999_999_999.999;

// Magnitude limits of the optional fields, matching their column precision.
const POWER_FACTOR_LIMIT: f64 = 9.999;
const FREQUENCY_LIMIT: f64 = 9_999.99;
const TEMPERATURE_LIMIT: f64 = 999.99;
const HUMIDITY_LIMIT: f64 = 999.99;

const INVALID_FORMAT: &str = "Invalid reading data format";

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    ((value + f64::EPSILON) * 100.0).round() / 100.0
}

/// The legacy "three decimal" rounding: [`round2`] applied to `value * 1000`.
pub fn round3(value: f64) -> f64 {
    round2(value * 1000.0) / 1000.0
}

/// How optional fields holding exactly `0` are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalFields {
    /// A present `0` is dropped, as the device firmware historically relied on.
    ZeroAsAbsent,
    /// Only a missing or `null` field counts as absent.
    Presence,
}

/// Telemetry as submitted by a device, after type and range validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawReading {
    /// Volts, 0–500.
    pub voltage: f64,
    /// Amperes, 0–100.
    pub current: f64,
    /// Watts, 0–50000.
    pub power: f64,
    /// Cumulative kWh, 0–999999999.999.
    pub energy: f64,
    pub power_factor: Option<f64>,
    /// Hz.
    pub frequency: Option<f64>,
    /// °C.
    pub temperature: Option<f64>,
    /// %.
    pub humidity: Option<f64>,
}

/// Telemetry with every field rounded to its stored precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedReading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub power_factor: Option<f64>,
    pub frequency: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl From<NormalizedReading> for RawReading {
    fn from(n: NormalizedReading) -> Self {
        Self {
            voltage: n.voltage,
            current: n.current,
            power: n.power,
            energy: n.energy,
            power_factor: n.power_factor,
            frequency: n.frequency,
            temperature: n.temperature,
            humidity: n.humidity,
        }
    }
}

/// Check field types and ranges.
///
/// Mandatory fields are checked in the order voltage, current, power,
/// energy and the first failure is reported. Optional fields are bounded in
/// magnitude so that rounding can never overflow. Nothing is rounded here.
pub fn validate(payload: &Value) -> Result<RawReading> {
    let obj = payload
        .as_object()
        .ok_or_else(|| Error::validation(INVALID_FORMAT))?;

    let voltage = mandatory(obj, "voltage", |v| (0.0..=VOLTAGE_MAX).contains(&v), "0-500V")?;
    let current = mandatory(obj, "current", |v| (0.0..=CURRENT_MAX).contains(&v), "0-100A")?;
    let power = mandatory(obj, "power", |v| (0.0..=POWER_MAX).contains(&v), "0-50000W")?;
    let energy = mandatory(
        obj,
        "energy",
        |v| (0.0..=ENERGY_MAX).contains(&v),
        "0-999999999.999kWh",
    )?;

    Ok(RawReading {
        voltage,
        current,
        power,
        energy,
        power_factor: optional(obj, "power_factor", POWER_FACTOR_LIMIT)?,
        frequency: optional(obj, "frequency", FREQUENCY_LIMIT)?,
        temperature: optional(obj, "temperature", TEMPERATURE_LIMIT)?,
        humidity: optional(obj, "humidity", HUMIDITY_LIMIT)?,
    })
}

/// Round every field of `raw` to its stored precision.
pub fn normalize(raw: &RawReading, optional_fields: OptionalFields) -> NormalizedReading {
    let present = |v: Option<f64>| match optional_fields {
        OptionalFields::ZeroAsAbsent => v.filter(|x| *x != 0.0),
        OptionalFields::Presence => v,
    };

    NormalizedReading {
        voltage: round2(raw.voltage),
        current: round3(raw.current),
        power: round3(raw.power),
        energy: round3(raw.energy),
        power_factor: present(raw.power_factor).map(round3),
        frequency: present(raw.frequency).map(round2),
        temperature: present(raw.temperature).map(round2),
        humidity: present(raw.humidity).map(round2),
    }
}

fn mandatory(
    obj: &Map<String, Value>,
    field: &str,
    in_range: impl Fn(f64) -> bool,
    bounds: &str,
) -> Result<f64> {
    obj.get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && in_range(*v))
        .ok_or_else(|| Error::validation(format!("Invalid {field} value ({bounds})")))
}

fn optional(obj: &Map<String, Value>, field: &str, limit: f64) -> Result<Option<f64>> {
    let value = match obj.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v.as_f64().ok_or_else(|| {
            Error::validation(format!("Invalid {field} value (must be a number)"))
        })?,
    };
    if !value.is_finite() || value.abs() > limit {
        return Err(Error::validation(format!(
            "Invalid {field} value (-{limit} to {limit})"
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn raw(voltage: f64, current: f64, power: f64, energy: f64) -> RawReading {
        RawReading {
            voltage,
            current,
            power,
            energy,
            power_factor: None,
            frequency: None,
            temperature: None,
            humidity: None,
        }
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(230.125), 230.13);
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(-1.5), -1.5);
        assert_eq!(round2(229.994), 229.99);
    }

    #[test]
    fn round2_stays_within_half_a_cent() {
        for i in 0..5000 {
            let v = i as f64 * 0.1234567;
            assert!((round2(v) - v).abs() <= 0.005 + 1e-9, "value {v}");
        }
    }

    #[test]
    fn round3_keeps_the_legacy_composition() {
        assert!(close(round3(5.2), 5.2));
        assert!(close(round3(12.345), 12.345));
        // Five fractional digits survive the composition.
        assert!(close(round3(1.234567), 1.23457));
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            raw(230.456, 5.23456, 1196.7891, 12.3456789),
            raw(0.0, 0.0, 0.0, 0.0),
            raw(499.999, 99.9999, 49_999.99999, 1e6 + 0.123456),
        ];
        for s in samples {
            let once = normalize(&s, OptionalFields::Presence);
            let twice = normalize(&RawReading::from(once), OptionalFields::Presence);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn zero_optional_is_dropped_under_legacy_policy() {
        let mut r = raw(230.0, 1.0, 230.0, 1.0);
        r.temperature = Some(0.0);
        r.humidity = Some(45.678);
        let n = normalize(&r, OptionalFields::ZeroAsAbsent);
        assert_eq!(n.temperature, None);
        assert_eq!(n.humidity, Some(45.68));
    }

    #[test]
    fn zero_optional_is_kept_under_presence_policy() {
        let mut r = raw(230.0, 1.0, 230.0, 1.0);
        r.temperature = Some(0.0);
        let n = normalize(&r, OptionalFields::Presence);
        assert_eq!(n.temperature, Some(0.0));
    }

    #[test]
    fn validate_accepts_a_typical_payload() {
        let r = validate(&json!({
            "voltage": 230, "current": 5.2, "power": 1196, "energy": 12.345,
            "frequency": 50.01, "temperature": null
        }))
        .unwrap();
        assert_eq!(r.voltage, 230.0);
        assert_eq!(r.frequency, Some(50.01));
        assert_eq!(r.temperature, None);
    }

    #[test]
    fn validate_reports_the_first_offending_field() {
        let err = validate(&json!({"voltage": 501, "current": 500, "power": 1, "energy": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid voltage value (0-500V)");

        let err = validate(&json!({"voltage": 230, "current": 100.5, "power": 1, "energy": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid current value (0-100A)");

        let err = validate(&json!({"voltage": 230, "current": 1, "power": 50_001, "energy": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid power value (0-50000W)");

        let err = validate(&json!({"voltage": 230, "current": 1, "power": 1, "energy": -0.1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid energy value (0-999999999.999kWh)");
    }

    #[test]
    fn validate_rejects_values_that_would_overflow_rounding() {
        let err = validate(&json!({"voltage": 230, "current": 1, "power": 230, "energy": 1e306}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid energy value (0-999999999.999kWh)");

        let err = validate(&json!({"voltage": 230, "current": 1, "power": 230, "energy": 1,
                                   "temperature": 1e307}))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid temperature value (-999.99 to 999.99)");

        let err = validate(&json!({"voltage": 230, "current": 1, "power": 230, "energy": 1,
                                   "power_factor": -12.5}))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid power_factor value (-9.999 to 9.999)");
    }

    #[test]
    fn largest_accepted_values_normalize_to_finite_numbers() {
        let r = validate(&json!({
            "voltage": 500, "current": 100, "power": 50000, "energy": ENERGY_MAX,
            "power_factor": -9.999, "frequency": 9999.99,
            "temperature": -999.99, "humidity": 999.99
        }))
        .unwrap();
        let n = normalize(&r, OptionalFields::Presence);
        let values = [
            n.voltage, n.current, n.power, n.energy,
            n.power_factor.unwrap(), n.frequency.unwrap(),
            n.temperature.unwrap(), n.humidity.unwrap(),
        ];
        assert!(values.iter().all(|v| v.is_finite()), "{n:?}");
        assert_eq!(n.temperature, Some(-999.99));
    }

    #[test]
    fn validate_rejects_wrong_types() {
        let err = validate(&json!({"voltage": "230", "current": 1, "power": 1, "energy": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = validate(&json!({"voltage": 230, "current": 1, "power": 1, "energy": 1,
                                   "humidity": "wet"}))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid humidity value (must be a number)");

        let err = validate(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.to_string(), INVALID_FORMAT);
    }

    #[test]
    fn validate_accepts_inclusive_bounds() {
        assert!(validate(&json!({"voltage": 0, "current": 0, "power": 0, "energy": 0})).is_ok());
        assert!(validate(&json!({"voltage": 500, "current": 100, "power": 50000, "energy": 0}))
            .is_ok());
    }
}
