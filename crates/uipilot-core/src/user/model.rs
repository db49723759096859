//! User domain model.
//!
//! Users own sessions and must grant consent before the pilot drives their
//! applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub consent_given: bool,
    /// When consent was last granted or revoked.
    #[serde(default)]
    pub consent_timestamp: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            consent_given: false,
            consent_timestamp: None,
        }
    }

    pub fn set_consent(&mut self, given: bool) {
        self.consent_given = given;
        self.consent_timestamp = Some(Utc::now());
    }
}
