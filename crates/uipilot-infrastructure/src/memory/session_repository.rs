use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uipilot_core::error::Result;
use uipilot_core::session::{Session, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, status = %session.status, "Session saved");
        Ok(())
    }

    async fn list(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut listed: Vec<Session> = sessions
            .values()
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listed.truncate(limit);
        Ok(listed)
    }
}
