//! Domain layer for UIPilot.
//!
//! Models, collaborator contracts and the pure decision components of the
//! step pipeline: the action translator, the safety guard and the retry
//! coordinator.

pub mod action;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod retry;
pub mod route;
pub mod safety;
pub mod session;
pub mod translator;
pub mod user;

pub use error::{PilotError, Result, Severity};
