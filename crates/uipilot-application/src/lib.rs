pub mod consent_service;
pub mod intervention;
pub mod route_tracker;
pub mod session;

pub use consent_service::ConsentService;
pub use intervention::{InterventionDecision, InterventionHandler};
pub use route_tracker::{Replay, RouteTracker};
pub use session::{Collaborators, SessionEngine, SessionEngineBuilder, StepOutcome, StepReport};
