//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Plant state machine, execution engine, and fleet supervision."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use plantsim_common::{ConfigError, PlantId, PlantType};
use thiserror::Error;

/// Errors surfaced by plant workers and the fleet supervisor.
///
/// Rejected or ignored commands are not errors; they only show up (or don't) on the
/// event stream.
#[derive(Debug, Error, PartialEq)]
pub enum PlantError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error("plant {plant}: plant type {plant_type} has no ramp-up worker")]
    UnsupportedPlantType { plant: PlantId, plant_type: PlantType },
    #[error("plant {0} is not running")]
    EngineStopped(PlantId),
    #[error("unknown plant {0}")]
    UnknownPlant(PlantId),
    #[error("plant {0} is already running")]
    DuplicatePlant(PlantId),
}
