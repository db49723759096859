//! Session application services.
//!
//! This module contains the session engine that owns live sessions, runs
//! their step pipeline and exposes the lifecycle control surface.

mod engine;
mod registry;

pub use engine::{Collaborators, SessionEngine, SessionEngineBuilder, StepOutcome, StepReport};
