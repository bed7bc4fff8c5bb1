//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static plant definitions supplied to plant workers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

/// Identifier of a configured power plant.
pub type PlantId = u64;

fn default_plant_type() -> PlantType {
    PlantType::RampUpType
}

/// Kind of simulated plant. Only the ramp-up variant has a worker implementation.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlantType {
    #[default]
    RampUpType,
    OnOffType,
    UnknownType,
}

impl fmt::Display for PlantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlantType::RampUpType => "RampUpType",
            PlantType::OnOffType => "OnOffType",
            PlantType::UnknownType => "UnknownType",
        };
        f.write_str(label)
    }
}

/// Immutable definition of a single plant, owned by the caller.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantConfig {
    pub id: PlantId,
    pub name: String,
    pub min_power: f64,
    pub max_power: f64,
    /// Power gained or shed per ramp tick.
    pub ramp_power_rate: f64,
    #[serde(rename = "ramp_tick_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ramp_tick_interval: Duration,
    #[serde(default = "default_plant_type")]
    pub plant_type: PlantType,
}

impl PlantConfig {
    /// Convenience constructor for a ramp-up plant.
    pub fn ramp_up(
        id: PlantId,
        name: impl Into<String>,
        min_power: f64,
        max_power: f64,
        ramp_power_rate: f64,
        ramp_tick_interval: Duration,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            min_power,
            max_power,
            ramp_power_rate,
            ramp_tick_interval,
            plant_type: PlantType::RampUpType,
        }
    }

    /// Check the numeric invariants a plant worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_power.is_finite() || !self.max_power.is_finite() {
            return Err(ConfigError::NonFinitePower { plant: self.id });
        }
        if self.min_power > self.max_power {
            return Err(ConfigError::PowerRange {
                plant: self.id,
                min_power: self.min_power,
                max_power: self.max_power,
            });
        }
        if !self.ramp_power_rate.is_finite() || self.ramp_power_rate <= 0.0 {
            return Err(ConfigError::RampRate {
                plant: self.id,
                rate: self.ramp_power_rate,
            });
        }
        if self.ramp_tick_interval.is_zero() {
            return Err(ConfigError::TickInterval { plant: self.id });
        }
        Ok(())
    }
}

/// Structural problems detected in a plant definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("plant {plant}: min_power and max_power must be finite")]
    NonFinitePower { plant: PlantId },
    #[error("plant {plant}: min_power {min_power} exceeds max_power {max_power}")]
    PowerRange {
        plant: PlantId,
        min_power: f64,
        max_power: f64,
    },
    #[error("plant {plant}: ramp_power_rate must be positive, got {rate}")]
    RampRate { plant: PlantId, rate: f64 },
    #[error("plant {plant}: ramp_tick_interval must be greater than zero")]
    TickInterval { plant: PlantId },
}
