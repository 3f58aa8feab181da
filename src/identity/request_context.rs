use super::Identity;
use crate::error::{AppError, AppResult};

/// Immutable per-request context built by the auth middleware and read by handlers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub request_id: String,
}

impl RequestContext {
    pub fn anonymous(request_id: impl Into<String>) -> Self {
        Self { identity: None, request_id: request_id.into() }
    }

    pub fn authenticated(identity: Identity, request_id: impl Into<String>) -> Self {
        Self { identity: Some(identity), request_id: request_id.into() }
    }

    /// The resolved caller, or 401 when the request is anonymous.
    pub fn identity(&self) -> AppResult<&Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("AUTH_REQUIRED", "Authentication required"))
    }
}
