//! Action domain module.

mod model;

pub use model::{
    ActionCandidate, ActionInput, ActionKind, ActionRecord, ActionTarget, Confidence, Coordinates,
    ExecutionStatus,
};
