//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fleet supervisor that owns one worker per configured plant."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;

use indexmap::IndexMap;
use parking_lot::Mutex;
use plantsim_common::{AppConfig, PlantConfig, PlantId};
use plantsim_events::EventStream;
use plantsim_metrics::PlantMetrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{EngineOptions, PlantEngine, PlantHandle};
use crate::error::PlantError;
use crate::machine::PlantCommand;

/// Plant-addressed command accepted by [`PlantFleet::route`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum FleetCommand {
    Dispatch { plant_id: PlantId, target_power: f64 },
    OutOfService { plant_id: PlantId },
    ReturnToService { plant_id: PlantId },
    ReturnToNormal { plant_id: PlantId },
}

impl FleetCommand {
    pub fn plant_id(&self) -> PlantId {
        match self {
            FleetCommand::Dispatch { plant_id, .. }
            | FleetCommand::OutOfService { plant_id }
            | FleetCommand::ReturnToService { plant_id }
            | FleetCommand::ReturnToNormal { plant_id } => *plant_id,
        }
    }

    /// Strip the address, leaving the command the worker applies.
    pub fn into_command(self) -> PlantCommand {
        match self {
            FleetCommand::Dispatch { target_power, .. } => PlantCommand::Dispatch { target_power },
            FleetCommand::OutOfService { .. } => PlantCommand::OutOfService,
            FleetCommand::ReturnToService { .. } => PlantCommand::ReturnToService,
            FleetCommand::ReturnToNormal { .. } => PlantCommand::ReturnToNormal,
        }
    }
}

/// Supervisor owning one [`PlantEngine`] per plant, all publishing to one stream.
#[derive(Debug)]
pub struct PlantFleet {
    stream: EventStream,
    options: EngineOptions,
    plants: Mutex<IndexMap<PlantId, PlantHandle>>,
}

impl PlantFleet {
    /// Start a worker for every definition.
    ///
    /// All definitions are checked before the first worker starts, so a rejected
    /// fleet publishes nothing.
    pub fn start(
        configs: impl IntoIterator<Item = PlantConfig>,
        stream: EventStream,
        options: EngineOptions,
    ) -> Result<Self, PlantError> {
        let configs: Vec<PlantConfig> = configs.into_iter().collect();
        let mut seen = HashSet::with_capacity(configs.len());
        for config in &configs {
            if !seen.insert(config.id) {
                return Err(PlantError::DuplicatePlant(config.id));
            }
            PlantEngine::admit(config)?;
        }

        let fleet = Self {
            stream,
            options,
            plants: Mutex::new(IndexMap::with_capacity(configs.len())),
        };
        for config in configs {
            let handle = PlantEngine::spawn(config, fleet.stream.clone(), fleet.options.clone())?;
            fleet.plants.lock().insert(handle.plant_id(), handle);
        }
        fleet.report_count();
        info!(plants = fleet.len(), "plant fleet started");
        Ok(fleet)
    }

    /// Start every plant declared in an application config.
    pub fn from_config(
        config: &AppConfig,
        stream: EventStream,
        metrics: Option<PlantMetrics>,
    ) -> Result<Self, PlantError> {
        let mut options = EngineOptions::from_config(&config.engine);
        options.metrics = metrics;
        Self::start(config.plants.iter().cloned(), stream, options)
    }

    /// Stream every worker of this fleet publishes to.
    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    pub fn plant(&self, plant_id: PlantId) -> Option<PlantHandle> {
        self.plants.lock().get(&plant_id).cloned()
    }

    /// Identifiers of the running plants, in start order.
    pub fn plant_ids(&self) -> Vec<PlantId> {
        self.plants.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.plants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plants.lock().is_empty()
    }

    /// Deliver a plant-addressed command to its worker.
    pub async fn route(&self, command: FleetCommand) -> Result<(), PlantError> {
        let plant_id = command.plant_id();
        let handle = self.plant(plant_id).ok_or_else(|| {
            warn!(plant_id, ?command, "command for unknown plant");
            PlantError::UnknownPlant(plant_id)
        })?;
        debug!(plant_id, ?command, "routing command");
        handle.send(command.into_command()).await
    }

    /// Start one more plant at runtime.
    pub fn add(&self, config: PlantConfig) -> Result<PlantHandle, PlantError> {
        let mut plants = self.plants.lock();
        if plants.contains_key(&config.id) {
            return Err(PlantError::DuplicatePlant(config.id));
        }
        let handle = PlantEngine::spawn(config, self.stream.clone(), self.options.clone())?;
        plants.insert(handle.plant_id(), handle.clone());
        drop(plants);
        info!(plant_id = handle.plant_id(), "plant added to fleet");
        self.report_count();
        Ok(handle)
    }

    /// Tear one plant down and wait for its worker to exit.
    pub async fn remove(&self, plant_id: PlantId) -> Result<(), PlantError> {
        let handle = self
            .plants
            .lock()
            .shift_remove(&plant_id)
            .ok_or(PlantError::UnknownPlant(plant_id))?;
        handle.shutdown().await;
        if let Some(metrics) = &self.options.metrics {
            metrics.forget_plant(plant_id);
        }
        self.report_count();
        info!(plant_id, "plant removed from fleet");
        Ok(())
    }

    /// Tear every plant down and wait for all workers to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<PlantHandle> = {
            let mut plants = self.plants.lock();
            plants.drain(..).map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        for handle in handles {
            handle.shutdown().await;
            if let Some(metrics) = &self.options.metrics {
                metrics.forget_plant(handle.plant_id());
            }
        }
        self.report_count();
        info!(plants = count, "plant fleet stopped");
    }

    fn report_count(&self) {
        if let Some(metrics) = &self.options.metrics {
            metrics.set_plant_count(self.len());
        }
    }
}
