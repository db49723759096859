//! Tracking sink trait.
//!
//! Defines the append-only storage contract behind the route tracker.

use super::model::{PlannedStep, Route, RouteClosure};
use crate::action::ActionRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Append-only storage for routes.
///
/// Every operation is keyed by session identity. Implementations must keep
/// the append order of a single session intact while appends for different
/// sessions run concurrently. Entries are never rewritten or removed.
///
/// Ordering rules (a planned step precedes its action record, at most one
/// record per step) are enforced by the route tracker, not by the sink.
#[async_trait]
pub trait TrackingSink: Send + Sync {
    /// Appends the ranked candidates proposed for a step.
    async fn append_planned(&self, session_id: &str, planned: PlannedStep) -> Result<()>;

    /// Appends the settled action record for a step.
    async fn append_action(&self, record: ActionRecord) -> Result<()>;

    /// Appends the terminal marker for a session.
    async fn append_closure(&self, session_id: &str, closure: RouteClosure) -> Result<()>;

    /// Loads everything recorded for a session.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Route))`: at least one entry exists for the session
    /// - `Ok(None)`: nothing was recorded for the session
    async fn load(&self, session_id: &str) -> Result<Option<Route>>;

    /// Lists session identities that have at least one entry.
    async fn session_ids(&self) -> Result<Vec<String>>;
}
