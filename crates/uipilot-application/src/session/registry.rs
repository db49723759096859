//! Session registry.
//!
//! Maps session identity to the live state the engine owns: the session
//! snapshot, the per-step failure counter and any control request waiting
//! for the current step to finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use uipilot_core::error::{PilotError, Result};
use uipilot_core::session::{Session, SessionStatus};

/// Control request accepted while a step was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingControl {
    Pause,
    Cancel,
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub session: Session,
    pub failures: u32,
    pub in_flight: bool,
    pub pending: Option<PendingControl>,
}

/// Everything the engine keeps for one session.
pub(crate) struct SessionSlot {
    state: Mutex<SlotState>,
    /// Held for the whole duration of a step.
    pub step_lock: tokio::sync::Mutex<()>,
    /// Serializes repository writes so the latest snapshot always wins.
    pub persist_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<SessionStatus>,
    /// Cooperative cancel flag, observed between attempts and steps.
    pub cancel: CancellationToken,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        let (status, _) = watch::channel(session.status);
        Self {
            state: Mutex::new(SlotState {
                session,
                failures: 0,
                in_flight: false,
                pending: None,
            }),
            step_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Locks the slot state. Never held across an await point.
    pub fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Session {
        self.state().session.clone()
    }

    /// Broadcasts the current status to watchers.
    pub fn publish(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }
}

#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub async fn insert(&self, session: Session) -> Arc<SessionSlot> {
        let slot = Arc::new(SessionSlot::new(session));
        let id = slot.state().session.id.clone();
        self.slots.write().await.insert(id, slot.clone());
        slot
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.slots
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| PilotError::not_found("Session", session_id))
    }

    /// Drops a session the engine no longer drives.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.write().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}
