//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for mirroring session snapshots.
///
/// The session engine stays the owner of lifecycle transitions; a repository
/// only receives the latest snapshot after each transition so sessions can be
/// listed and inspected after they leave the in-memory registry.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Saves (inserts or replaces) a session snapshot.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Lists stored sessions, optionally filtered by owning user, newest first.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Restrict the listing to this user when present
    /// * `limit` - Maximum number of sessions returned
    async fn list(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<Session>>;
}
