//! In-memory repositories.
//!
//! Suitable for tests, development and short-lived processes. Nothing here
//! survives a restart.

mod session_repository;
mod tracking_sink;
mod user_repository;

pub use session_repository::InMemorySessionRepository;
pub use tracking_sink::InMemoryTrackingSink;
pub use user_repository::InMemoryUserRepository;
