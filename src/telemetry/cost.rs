/// Tariff applied when none is configured, in currency units per kWh.
pub const DEFAULT_TARIFF: f64 = 0.12;

/// Estimated cost of `energy_kwh` at `tariff`. Not rounded.
pub fn estimate_cost(energy_kwh: f64, tariff: f64) -> f64 {
    energy_kwh * tariff
}
