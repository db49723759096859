pub mod config_service;
pub mod json_lines_tracking_sink;
pub mod memory;
pub mod paths;

pub use crate::config_service::ConfigService;
pub use crate::json_lines_tracking_sink::JsonLinesTrackingSink;
pub use crate::memory::{InMemorySessionRepository, InMemoryTrackingSink, InMemoryUserRepository};
pub use crate::paths::PilotPaths;
