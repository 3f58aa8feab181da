//! Resolves the `Authorization: Bearer <token>` header of a request to an `Identity`.
//!
//! Resolution runs `NoToken -> Verifying -> Resolved | Rejected`; `resolve` returns the final state
//! and the two entry points decide what to do with it: `authenticate` turns everything but
//! `Resolved` into a 401, `authenticate_optional` turns it into "anonymous".

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::debug;

use super::{Identity, TokenError, TokenService};
use crate::error::{AppError, AppResult};
use crate::storage::{CredentialStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    NoToken,
    Resolved(Identity),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidToken,
    ExpiredToken,
    UnknownOrInactiveUser,
}

impl Rejection {
    fn into_error(self) -> AppError {
        match self {
            Rejection::InvalidToken => AppError::unauthorized("INVALID_TOKEN", "Invalid token"),
            Rejection::ExpiredToken => AppError::unauthorized("TOKEN_EXPIRED", "Token expired"),
            Rejection::UnknownOrInactiveUser => AppError::unauthorized("USER_INACTIVE", "User not found or inactive"),
        }
    }
}

/// Extract the bearer credential; a missing header, another scheme or an empty token all count as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenService,
    credentials: Arc<dyn CredentialStore>,
    /// Present only when demo mode is on.
    demo: Option<Identity>,
}

impl Authenticator {
    pub fn new(tokens: TokenService, credentials: Arc<dyn CredentialStore>, demo: Option<Identity>) -> Self {
        Self { tokens, credentials, demo }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<AuthOutcome, StoreError> {
        match bearer_token(headers) {
            None => Ok(AuthOutcome::NoToken),
            Some(token) => self.resolve_token(token),
        }
    }

    pub fn resolve_token(&self, token: &str) -> Result<AuthOutcome, StoreError> {
        let subject = match self.tokens.verify(token) {
            Ok(s) => s,
            Err(TokenError::Expired) => return Ok(AuthOutcome::Rejected(Rejection::ExpiredToken)),
            Err(_) => return Ok(AuthOutcome::Rejected(Rejection::InvalidToken)),
        };
        if let Some(demo) = self.demo.as_ref().filter(|d| d.id == subject.user_id) {
            return Ok(AuthOutcome::Resolved(demo.clone()));
        }
        match self.credentials.user_by_id(&subject.user_id)? {
            Some(user) if user.is_active => Ok(AuthOutcome::Resolved(Identity::from(&user))),
            _ => Ok(AuthOutcome::Rejected(Rejection::UnknownOrInactiveUser)),
        }
    }

    /// Required authentication: anything short of a resolved, active identity is a 401.
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<Identity> {
        match self.resolve(headers)? {
            AuthOutcome::Resolved(identity) => Ok(identity),
            AuthOutcome::NoToken => Err(AppError::unauthorized("NO_TOKEN", "No token provided")),
            AuthOutcome::Rejected(why) => {
                debug!(target: "auth", ?why, "bearer token rejected");
                Err(why.into_error())
            }
        }
    }

    /// Optional authentication: failures (store errors included) silently yield no identity.
    pub fn authenticate_optional(&self, headers: &HeaderMap) -> Option<Identity> {
        match self.resolve(headers) {
            Ok(AuthOutcome::Resolved(identity)) => Some(identity),
            _ => None,
        }
    }
}
