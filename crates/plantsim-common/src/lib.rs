//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the plant runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the plantsim workspace.
//! This crate exposes plant definitions, configuration loading, logging
//! initialisation, and small time helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod plant;
pub mod time;

pub use config::{
    AppConfig, EngineConfig, EventsConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use plant::{ConfigError, PlantConfig, PlantId, PlantType};
