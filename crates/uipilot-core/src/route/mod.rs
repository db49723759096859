//! Route domain module.
//!
//! - `model`: `Route`, `PlannedStep`, `RouteClosure`, `RouteStats`
//! - `repository`: the `TrackingSink` storage contract

mod model;
mod repository;

pub use model::{PlannedStep, Route, RouteClosure, RouteStats};
pub use repository::TrackingSink;
