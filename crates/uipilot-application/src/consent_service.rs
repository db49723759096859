//! User consent bookkeeping.

use std::sync::Arc;
use uipilot_core::error::{PilotError, Result};
use uipilot_core::user::{User, UserRepository};

#[derive(Clone)]
pub struct ConsentService {
    users: Arc<dyn UserRepository>,
}

impl ConsentService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Grants or revokes consent, creating the user on first contact.
    pub async fn record_consent(&self, user_id: &str, given: bool) -> Result<User> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .unwrap_or_else(|| User::new(user_id));
        user.set_consent(given);
        self.users.save(&user).await?;
        tracing::info!(user_id, consent_given = given, "Consent recorded");
        Ok(user)
    }

    pub async fn has_consent(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .users
            .find_by_id(user_id)
            .await?
            .is_some_and(|u| u.consent_given))
    }

    /// Fails with `ConsentRequired` unless the user has consented.
    pub async fn ensure_consent(&self, user_id: &str) -> Result<()> {
        if self.has_consent(user_id).await? {
            Ok(())
        } else {
            Err(PilotError::ConsentRequired {
                user_id: user_id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uipilot_infrastructure::InMemoryUserRepository;

    #[tokio::test]
    async fn consent_can_be_granted_and_revoked() {
        let service = ConsentService::new(Arc::new(InMemoryUserRepository::new()));
        assert!(matches!(
            service.ensure_consent("u1").await,
            Err(PilotError::ConsentRequired { .. })
        ));

        let user = service.record_consent("u1", true).await.unwrap();
        assert!(user.consent_timestamp.is_some());
        service.ensure_consent("u1").await.unwrap();

        service.record_consent("u1", false).await.unwrap();
        assert!(!service.has_consent("u1").await.unwrap());
    }
}
