use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::principal::Identity;
use super::session::{TokenService, TokenSubject};
use crate::config::DemoSettings;
use crate::error::{AppError, AppResult};
use crate::security::{hash_password, verify_password};
use crate::storage::{NewUser, SharedStore};

pub const MIN_PASSWORD_LEN: usize = 8;

// Verified against when the email is unknown.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("opensprint-unknown-account").ok());

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub user: Identity,
    pub token: String,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
    fn register(&self, req: &RegisterRequest) -> AppResult<LoginResponse>;
}

/// Email/password accounts held in the local store, plus the demo short-circuit.
#[derive(Clone)]
pub struct LocalAuthProvider {
    store: SharedStore,
    tokens: TokenService,
    /// Only set when demo mode is on.
    demo: Option<DemoSettings>,
}

fn invalid_credentials() -> AppError {
    AppError::unauthorized("INVALID_CREDENTIALS", "Invalid email or password")
}

fn check_password_strength(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("WEAK_PASSWORD", "Password must be at least 8 characters long"));
    }
    Ok(())
}

impl LocalAuthProvider {
    pub fn new(store: SharedStore, tokens: TokenService, demo: Option<DemoSettings>) -> Self {
        Self { store, tokens, demo }
    }

    fn issue_for(&self, user: Identity) -> AppResult<LoginResponse> {
        let token = self
            .tokens
            .issue(&TokenSubject::new(user.id.clone(), user.email.clone()))
            .map_err(|e| AppError::internal("TOKEN_ERROR".to_string(), e.to_string()))?;
        Ok(LoginResponse { user, token })
    }

    fn demo_login(&self, req: &LoginRequest) -> Option<&DemoSettings> {
        let demo = self.demo.as_ref()?;
        let ident = req.email.trim();
        let matches_ident = ident == demo.username || ident.eq_ignore_ascii_case(&demo.user_email);
        (matches_ident && req.password == demo.password).then_some(demo)
    }

    /// Replace the caller's password after re-checking the current one.
    pub fn change_password(&self, identity: &Identity, current: &str, new: &str) -> AppResult<()> {
        if identity.is_demo() {
            return Err(AppError::forbidden("DEMO_READ_ONLY", "The demo account cannot change its password"));
        }
        if current.is_empty() || new.is_empty() {
            return Err(AppError::bad_request("VALIDATION_ERROR", "Current and new password are required"));
        }
        check_password_strength(new)?;
        let stored = self
            .store
            .read()
            .user(&identity.id)
            .map(|u| u.password_hash.clone())
            .ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "User not found"))?;
        if !verify_password(&stored, current) {
            return Err(AppError::bad_request("INVALID_PASSWORD", "Current password is incorrect"));
        }
        let hash = hash_password(new)?;
        self.store.write(|s| s.set_password_hash(&identity.id, hash))?;
        info!(target: "auth", user = %identity.id, "password changed");
        Ok(())
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        if req.email.trim().is_empty() || req.password.is_empty() {
            return Err(AppError::bad_request("VALIDATION_ERROR", "Email and password are required"));
        }
        if let Some(demo) = self.demo_login(req) {
            info!(target: "auth", "demo login");
            return self.issue_for(Identity::demo(demo));
        }
        let user = self.store.read().user_by_email(&req.email).cloned();
        let Some(user) = user else {
            // Unknown emails pay the same argon2 cost as a wrong password.
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(dummy, &req.password);
            }
            debug!(target: "auth", "login for unknown email");
            return Err(invalid_credentials());
        };
        if !verify_password(&user.password_hash, &req.password) {
            debug!(target: "auth", user = %user.id, "login with wrong password");
            return Err(invalid_credentials());
        }
        if !user.is_active {
            return Err(AppError::unauthorized("ACCOUNT_INACTIVE", "Account is disabled"));
        }
        info!(target: "auth", user = %user.id, "login");
        self.issue_for(Identity::from(&user))
    }

    fn register(&self, req: &RegisterRequest) -> AppResult<LoginResponse> {
        let email = req.email.trim();
        let name = req.name.trim();
        if email.is_empty() || req.password.is_empty() || name.is_empty() {
            return Err(AppError::bad_request("VALIDATION_ERROR", "Email, password, and name are required"));
        }
        if !email.contains('@') {
            return Err(AppError::bad_request("VALIDATION_ERROR", "A valid email address is required"));
        }
        check_password_strength(&req.password)?;
        if self.store.read().user_by_email(email).is_some() {
            return Err(AppError::conflict("USER_EXISTS", "User already exists"));
        }
        let password_hash = hash_password(&req.password)?;
        // Re-checked inside the commit; a racing registration surfaces as 409 from the store.
        let new = NewUser { email: email.to_string(), name: name.to_string(), password_hash, avatar_url: None };
        let user = self.store.write(|s| s.create_user(new))?;
        info!(target: "auth", user = %user.id, "registered");
        self.issue_for(Identity::from(&user))
    }
}
