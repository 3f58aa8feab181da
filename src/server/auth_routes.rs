//! `/api/auth`: login, registration, profile and public client configuration.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::response::{blocking, created, json_body, message, mutate, ok};
use super::{optional_auth, require_auth, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{AuthProvider, Identity, LoginRequest, RegisterRequest, RequestContext};
use crate::storage::ProfileUpdate;

pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/config", get(client_config));
    let optional = Router::new()
        .route("/logout", post(logout))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));
    let protected = Router::new()
        .route("/me", get(me).put(update_me))
        .route("/me/password", put(change_password))
        .route_layer(from_fn_with_state(state.clone(), require_auth));
    public.merge(optional).merge(protected)
}

#[derive(Debug, Serialize)]
struct UserEnvelope {
    user: Identity,
}

async fn login(State(state): State<AppState>, payload: Result<Json<LoginRequest>, JsonRejection>) -> AppResult<Response> {
    let req = json_body(payload)?;
    let provider = state.provider.clone();
    let out = blocking(move || provider.login(&req)).await?;
    Ok(ok(out).into_response())
}

async fn register(State(state): State<AppState>, payload: Result<Json<RegisterRequest>, JsonRejection>) -> AppResult<Response> {
    let req = json_body(payload)?;
    let provider = state.provider.clone();
    let out = blocking(move || provider.register(&req)).await?;
    Ok(created(out).into_response())
}

/// Tokens are stateless; logging out is the client discarding its token.
async fn logout(Extension(ctx): Extension<RequestContext>) -> Response {
    if let Some(identity) = ctx.identity.as_ref() {
        debug!(target: "auth", user = %identity.id, request = %ctx.request_id, "logout");
    }
    message("Logged out successfully")
}

async fn me(Extension(ctx): Extension<RequestContext>) -> AppResult<Response> {
    let user = ctx.identity()?.clone();
    Ok(ok(UserEnvelope { user }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePayload {
    name: Option<String>,
    avatar_url: Option<String>,
}

async fn update_me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<ProfilePayload>, JsonRejection>,
) -> AppResult<Response> {
    let identity = ctx.identity()?;
    let body = json_body(payload)?;
    if identity.is_demo() {
        return Err(AppError::forbidden("DEMO_READ_ONLY", "The demo account cannot be modified"));
    }
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Name cannot be empty"));
    }
    let (uid, update) = (identity.id.clone(), ProfileUpdate { name: body.name, avatar_url: body.avatar_url });
    let user = mutate(&state.store, move |s| s.update_profile(&uid, update)).await?;
    info!(target: "auth", user = %user.id, "profile updated");
    Ok(ok(UserEnvelope { user: Identity::from(&user) }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordPayload {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<PasswordPayload>, JsonRejection>,
) -> AppResult<Response> {
    let identity = ctx.identity()?.clone();
    let body = json_body(payload)?;
    let provider = state.provider.clone();
    blocking(move || provider.change_password(&identity, &body.current_password, &body.new_password)).await?;
    Ok(message("Password updated successfully"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoCredentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig {
    demo_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    demo_credentials: Option<DemoCredentials>,
}

async fn client_config(State(state): State<AppState>) -> Response {
    let cfg = &state.config;
    let demo_credentials = cfg
        .demo_mode
        .then(|| DemoCredentials { username: cfg.demo.username.clone(), password: cfg.demo.password.clone() });
    ok(ClientConfig { demo_mode: cfg.demo_mode, demo_credentials }).into_response()
}
