//! Session domain module.
//!
//! - `model`: `Session`, `SessionStatus`, halt reasons
//! - `repository`: persistence trait for session snapshots

mod model;
mod repository;

pub use model::{HaltCode, HaltReason, Session, SessionStatus};
pub use repository::SessionRepository;
