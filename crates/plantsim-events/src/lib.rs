//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Plant signal types and the shared event stream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Observable plant signals and the multicast stream that carries them.
#![warn(missing_docs)]

pub mod signal;
pub mod stream;

pub use signal::{RunState, Signal};
pub use stream::{EventStream, EventSubscription, SubscriptionId, WaitError};
