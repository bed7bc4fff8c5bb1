//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Plant signal types and the shared event stream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use plantsim_common::{PlantConfig, PlantId};
use serde::{Deserialize, Serialize};

/// Operating state of a ramp-up plant.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Output has settled at the current set-point.
    Active,
    /// Output is climbing toward a higher set-point.
    RampingUp,
    /// Output is dropping toward a lower set-point.
    RampingDown,
    /// Plant is unavailable and ignores everything except a return to service.
    OutOfService,
}

impl RunState {
    /// Whether the plant is converging toward its set-point.
    pub fn is_ramping(&self) -> bool {
        matches!(self, RunState::RampingUp | RunState::RampingDown)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Active => "Active",
            RunState::RampingUp => "RampingUp",
            RunState::RampingDown => "RampingDown",
            RunState::OutOfService => "OutOfService",
        };
        f.write_str(label)
    }
}

/// Observable event emitted by a plant worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// The plant worker started and seeded its baseline state.
    Genesis {
        /// State the plant was seeded with.
        new_state: RunState,
        /// Time the baseline was created.
        timestamp: DateTime<Utc>,
        /// Definition of the emitting plant.
        config: Arc<PlantConfig>,
    },
    /// The plant moved from one state snapshot to the next.
    Transition {
        /// State before the transition.
        old_state: RunState,
        /// State after the transition.
        new_state: RunState,
        /// Time of the transition.
        timestamp: DateTime<Utc>,
        /// Definition of the emitting plant.
        config: Arc<PlantConfig>,
    },
    /// A command could not be honoured; the plant carried on unaffected.
    DispatchAlert {
        /// Human readable explanation.
        message: String,
        /// Time the command was rejected.
        timestamp: DateTime<Utc>,
        /// Definition of the emitting plant.
        config: Arc<PlantConfig>,
    },
}

impl Signal {
    /// Identifier of the plant that emitted the signal.
    pub fn plant_id(&self) -> PlantId {
        self.config().id
    }

    /// Definition of the plant that emitted the signal.
    pub fn config(&self) -> &PlantConfig {
        match self {
            Signal::Genesis { config, .. }
            | Signal::Transition { config, .. }
            | Signal::DispatchAlert { config, .. } => config,
        }
    }

    /// Event time carried by the signal.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Signal::Genesis { timestamp, .. }
            | Signal::Transition { timestamp, .. }
            | Signal::DispatchAlert { timestamp, .. } => *timestamp,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Genesis { .. } => "genesis",
            Signal::Transition { .. } => "transition",
            Signal::DispatchAlert { .. } => "dispatch_alert",
        }
    }

    /// True for the transition that leaves the plant settled in `Active`.
    ///
    /// This is the completion acknowledgement for dispatches, returns to normal,
    /// and returns to service.
    pub fn reached_active(&self) -> bool {
        matches!(
            self,
            Signal::Transition {
                new_state: RunState::Active,
                ..
            }
        )
    }
}
