//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry read model exposed to monitoring layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

/// String-keyed, string-valued telemetry view of a plant snapshot.
pub type TelemetrySignals = BTreeMap<String, String>;

pub const POWER_PLANT_ID: &str = "powerPlantId";
pub const ACTIVE_POWER: &str = "activePower";
pub const IS_AVAILABLE: &str = "isAvailable";
pub const IS_DISPATCHED: &str = "isDispatched";
pub const SET_POINT: &str = "setPoint";
pub const TIMESTAMP: &str = "timestamp";

/// Every key present in a [`TelemetrySignals`] map.
pub const SIGNAL_KEYS: [&str; 6] = [
    POWER_PLANT_ID,
    ACTIVE_POWER,
    IS_AVAILABLE,
    IS_DISPATCHED,
    SET_POINT,
    TIMESTAMP,
];

/// Render a power value as a decimal that always carries a fractional part.
pub fn format_power(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub fn format_flag(flag: bool) -> String {
    flag.to_string()
}

/// Whether `value` lies within `tolerance_pct` percent of `target`.
///
/// Observers polling a converging plant use this to accept a reading taken between
/// ramp ticks.
pub fn within_tolerance(value: f64, target: f64, tolerance_pct: f64) -> bool {
    let band = (target * tolerance_pct / 100.0).abs();
    (value - target).abs() <= band
}
