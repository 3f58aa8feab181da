use chrono::Utc;

use super::{new_id, Store, StoreError, User};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub avatar_url: Option<String>,
}

/// Partial profile edit. An empty `avatar_url` clears the avatar.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Emails are unique case-insensitively.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl Store {
    pub fn create_user(&mut self, new: NewUser) -> Result<User, StoreError> {
        let email = normalize_email(&new.email);
        if self.user_by_email(&email).is_some() {
            return Err(StoreError::UniqueViolation { entity: "user", key: email });
        }
        let now = Utc::now();
        let user = User {
            id: new_id(),
            email,
            name: new.name.trim().to_string(),
            password_hash: new.password_hash,
            avatar_url: new.avatar_url,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.tables.users.get(id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = normalize_email(email);
        self.tables.users.values().find(|u| u.email == email)
    }

    pub fn update_profile(&mut self, id: &str, update: ProfileUpdate) -> Result<User, StoreError> {
        let user = self.user_mut(id)?;
        if let Some(name) = update.name {
            user.name = name.trim().to_string();
        }
        if let Some(avatar) = update.avatar_url {
            user.avatar_url = if avatar.trim().is_empty() { None } else { Some(avatar) };
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    pub fn set_password_hash(&mut self, id: &str, password_hash: String) -> Result<(), StoreError> {
        let user = self.user_mut(id)?;
        user.password_hash = password_hash;
        user.updated_at = Utc::now();
        Ok(())
    }

    /// Soft-disable (or re-enable) an account; disabled users fail authentication.
    pub fn set_user_active(&mut self, id: &str, active: bool) -> Result<User, StoreError> {
        let user = self.user_mut(id)?;
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    pub fn set_user_active_by_email(&mut self, email: &str, active: bool) -> Result<User, StoreError> {
        let id = self
            .user_by_email(email)
            .map(|u| u.id.clone())
            .ok_or_else(|| StoreError::NotFound { entity: "user", id: normalize_email(email) })?;
        self.set_user_active(&id, active)
    }

    fn user_mut(&mut self, id: &str) -> Result<&mut User, StoreError> {
        self.tables
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { entity: "user", id: id.to_string() })
    }
}
