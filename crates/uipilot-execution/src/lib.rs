//! Runtime wiring: tracing setup, the session event stream and scripted
//! collaborators for dry runs.

pub mod logging;
pub mod scripted;
pub mod tracing_layer;

pub use logging::init_tracing;
pub use scripted::{Scenario, ScriptedDriver, ScriptedInference, ScriptedPerception};
pub use tracing_layer::{SessionEvent, SessionEventLayer};
