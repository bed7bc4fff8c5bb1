//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Plant state machine, execution engine, and fleet supervision."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Ramp-type plant simulation core.
//!
//! [`machine`] holds the immutable plant snapshot and the pure transition function,
//! [`engine`] runs one sequential worker per plant, and [`fleet`] supervises a set of
//! workers and routes plant-addressed commands to them.

pub mod engine;
pub mod error;
pub mod fleet;
pub mod machine;
pub mod telemetry;
pub mod ticker;

pub use engine::{EngineOptions, PlantEngine, PlantHandle};
pub use error::PlantError;
pub use fleet::{FleetCommand, PlantFleet};
pub use machine::{transition, Outcome, PlantCommand, PlantInput, PlantState};
pub use plantsim_events::{EventStream, EventSubscription, RunState, Signal, SubscriptionId};
pub use telemetry::{within_tolerance, TelemetrySignals};
