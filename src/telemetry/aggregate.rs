//! Time-windowed statistics over a device's readings.
//!
//! Every aggregate of an empty window is zero, never missing, so a device
//! without activity renders like any other.

use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::db::models::PowerReading;

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// `[local midnight, next local midnight)` of the day containing `now`.
    pub fn today<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let date = now.date_naive();
        let next = date.succ_opt().unwrap_or(date);
        Self {
            start: midnight(&tz, date, now),
            end: midnight(&tz, next, &(now.clone() + Duration::days(1))),
        }
    }
}

fn midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate, fallback: &DateTime<Tz>) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| fallback.clone())
        .with_timezone(&Utc)
}

/// Named reporting period accepted by the stats endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    Week,
    Month,
    Year,
}

impl Period {
    /// Unrecognized names fall back to `Today`.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "week" => Period::Week,
            "month" => Period::Month,
            "year" => Period::Year,
            _ => Period::Today,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Resolve to a window ending at `now`.
    pub fn resolve<Tz: TimeZone>(self, now: &DateTime<Tz>) -> TimeRange {
        let end = now.with_timezone(&Utc);
        let start = match self {
            Period::Today => TimeRange::today(now).start,
            Period::Week => end - Duration::days(7),
            Period::Month => back_months(now, 1),
            Period::Year => back_months(now, 12),
        };
        TimeRange { start, end }
    }
}

fn back_months<Tz: TimeZone>(now: &DateTime<Tz>, months: u32) -> DateTime<Utc> {
    now.clone()
        .checked_sub_months(Months::new(months))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) - Duration::days(30 * months as i64))
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Every statistic any endpoint needs over one window, computed in one pass.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct ReadingSummary {
    pub reading_count: i64,
    pub total_energy: f64,
    pub avg_power: f64,
    pub peak_power: f64,
    pub min_power: f64,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub first_reading: Option<DateTime<Utc>>,
    pub last_reading: Option<DateTime<Utc>>,
}

/// Summarize an in-memory reading set. Callers pass only the readings of
/// the window they are interested in.
pub fn summarize(readings: &[PowerReading]) -> ReadingSummary {
    if readings.is_empty() {
        return ReadingSummary::default();
    }

    let n = readings.len() as f64;
    let mut s = ReadingSummary {
        reading_count: readings.len() as i64,
        peak_power: f64::MIN,
        min_power: f64::MAX,
        ..ReadingSummary::default()
    };
    let (mut power_sum, mut voltage_sum, mut current_sum) = (0.0, 0.0, 0.0);

    for r in readings {
        s.total_energy += r.energy;
        power_sum += r.power;
        voltage_sum += r.voltage;
        current_sum += r.current;
        s.peak_power = s.peak_power.max(r.power);
        s.min_power = s.min_power.min(r.power);
        s.first_reading = Some(s.first_reading.map_or(r.timestamp, |t| t.min(r.timestamp)));
        s.last_reading = Some(s.last_reading.map_or(r.timestamp, |t| t.max(r.timestamp)));
    }

    s.avg_power = power_sum / n;
    s.avg_voltage = voltage_sum / n;
    s.avg_current = current_sum / n;
    s
}

/// "Today" snapshot attached to status and stats responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TodayStats {
    pub readings_count: i64,
    pub total_energy: f64,
    pub avg_power: f64,
    pub peak_power: f64,
    pub min_power: f64,
    pub avg_voltage: f64,
    pub avg_current: f64,
}

impl From<&ReadingSummary> for TodayStats {
    fn from(s: &ReadingSummary) -> Self {
        Self {
            readings_count: s.reading_count,
            total_energy: s.total_energy,
            avg_power: s.avg_power,
            peak_power: s.peak_power,
            min_power: s.min_power,
            avg_voltage: s.avg_voltage,
            avg_current: s.avg_current,
        }
    }
}

/// Energy statistics over an arbitrary period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WindowStats {
    pub reading_count: i64,
    pub total_energy: f64,
    pub avg_power: f64,
    pub peak_power: f64,
    pub min_power: f64,
}

impl From<&ReadingSummary> for WindowStats {
    fn from(s: &ReadingSummary) -> Self {
        Self {
            reading_count: s.reading_count,
            total_energy: s.total_energy,
            avg_power: s.avg_power,
            peak_power: s.peak_power,
            min_power: s.min_power,
        }
    }
}

/// Unbounded statistics over a device's whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LifetimeStats {
    pub total_readings: i64,
    pub first_reading: Option<DateTime<Utc>>,
    pub last_reading: Option<DateTime<Utc>>,
    pub avg_power: f64,
    pub max_power: f64,
    pub min_power: f64,
    pub total_energy: f64,
}

impl From<&ReadingSummary> for LifetimeStats {
    fn from(s: &ReadingSummary) -> Self {
        Self {
            total_readings: s.reading_count,
            first_reading: s.first_reading,
            last_reading: s.last_reading,
            avg_power: s.avg_power,
            max_power: s.peak_power,
            min_power: s.min_power,
            total_energy: s.total_energy,
        }
    }
}
