//! Unified application error model and HTTP mapping.
//! Every handler and gate returns `AppResult<T>`; the single `IntoResponse` impl below turns an
//! `AppError` into the `{success: false, error: {...}}` envelope with the matching status code.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    BadRequest { code: String, message: String },
    Unauthorized { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    RateLimited { code: String, message: String, retry_after_secs: u64 },
    Internal { code: String, message: String },
    NotImplemented { code: String, message: String },
}

// Toggled once at startup from the configured environment.
static EXPOSE_STACK: AtomicBool = AtomicBool::new(false);

/// Include the error's debug rendering as `error.stack` in responses (development only).
pub fn set_expose_stack(on: bool) {
    EXPOSE_STACK.store(on, Ordering::Relaxed);
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::BadRequest { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::RateLimited { code, .. }
            | AppError::Internal { code, .. }
            | AppError::NotImplemented { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::BadRequest { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::RateLimited { message, .. }
            | AppError::Internal { message, .. }
            | AppError::NotImplemented { message, .. } => message.as_str(),
        }
    }

    pub fn bad_request<S: Into<String>>(code: S, msg: S) -> Self { AppError::BadRequest { code: code.into(), message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }
    pub fn not_implemented<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotImplemented { code: code.into(), message: msg.into() } }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        AppError::RateLimited {
            code: "RATE_LIMIT_EXCEEDED".into(),
            message: "Too many requests".into(),
            retry_after_secs,
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::BadRequest { .. } => 400,
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::RateLimited { .. } => 429,
            AppError::Internal { .. } => 500,
            AppError::NotImplemented { .. } => 501,
        }
    }

    /// The `error` object of the response envelope.
    pub fn envelope(&self, with_stack: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "message": self.message(),
            "code": self.code_str(),
        });
        if let AppError::RateLimited { retry_after_secs, .. } = self {
            body["retryAfter"] = serde_json::json!(retry_after_secs);
        }
        if with_stack {
            body["stack"] = serde_json::Value::String(format!("{self:?}"));
        }
        serde_json::json!({ "success": false, "error": body })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "INTERNAL_ERROR".into(), message: err.to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.code_str(), "request failed: {}", self.message());
        } else {
            debug!(status = status.as_u16(), code = self.code_str(), "request rejected: {}", self.message());
        }
        let body = Json(self.envelope(EXPOSE_STACK.load(Ordering::Relaxed)));
        let mut resp = (status, body).into_response();
        if let AppError::RateLimited { retry_after_secs, .. } = &self {
            resp.headers_mut().insert(axum::http::header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        resp
    }
}
