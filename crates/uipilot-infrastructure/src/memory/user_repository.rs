use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uipilot_core::error::Result;
use uipilot_core::user::{User, UserRepository};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn save(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(user.id.clone(), user.clone());
        Ok(())
    }
}
