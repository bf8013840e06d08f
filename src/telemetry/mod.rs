//! Pure telemetry domain logic: no I/O, no shared state.

pub mod aggregate;
pub mod alerts;
pub mod cost;
pub mod normalize;
