use serde::{Deserialize, Serialize};

use crate::config::DemoSettings;
use crate::storage::User;

/// Reserved id of the non-persisted demo user.
pub const DEMO_USER_ID: &str = "demo-user-id";

/// The resolved caller attached to a request once authentication succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub is_active: bool,
}

impl Identity {
    /// Synthetic, always-active demo identity. Never looked up in the store.
    pub fn demo(settings: &DemoSettings) -> Self {
        Self {
            id: DEMO_USER_ID.to_string(),
            email: settings.user_email.clone(),
            name: settings.user_name.clone(),
            avatar_url: None,
            is_active: true,
        }
    }

    pub fn is_demo(&self) -> bool {
        self.id == DEMO_USER_ID
    }
}

impl From<&User> for Identity {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            email: u.email.clone(),
            name: u.name.clone(),
            avatar_url: u.avatar_url.clone(),
            is_active: u.is_active,
        }
    }
}
