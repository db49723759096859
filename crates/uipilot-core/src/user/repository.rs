//! User repository trait.

use super::model::User;
use crate::error::Result;
use async_trait::async_trait;

/// Repository for users and their consent state.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>>;

    async fn save(&self, user: &User) -> Result<()>;
}
