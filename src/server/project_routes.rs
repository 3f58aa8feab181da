//! `/api/projects`: the caller's projects, project settings and membership management.
//!
//! Every route sits behind `require_auth`. Project-scoped routes run the matching gate from
//! `identity::authorizer` before touching the store.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Path, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::response::{created, double_option, json_body, message, mutate, ok};
use super::{require_auth, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{
    can_manage_project_members, get_user_projects, require_project_access, require_project_admin, ProjectAccess,
    ProjectRole, RequestContext,
};
use crate::storage::{NewProject, Project, ProjectMember, ProjectType, ProjectUpdate, Store, UserSummary};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/{projectId}", get(get_project).put(update_project))
        .route("/{projectId}/members", get(list_members).post(add_member))
        .route("/{projectId}/members/{memberId}", put(update_member).delete(remove_member))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberView {
    #[serde(flatten)]
    member: ProjectMember,
    user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectView {
    #[serde(flatten)]
    project: Project,
    members: Vec<MemberView>,
    issue_count: usize,
    #[serde(flatten)]
    access: ProjectAccess,
}

fn member_view(store: &Store, member: ProjectMember) -> MemberView {
    let user = store.user(&member.user_id).map(UserSummary::from);
    MemberView { member, user }
}

fn project_view(store: &Store, access: ProjectAccess) -> AppResult<ProjectView> {
    let project = store
        .project(&access.project_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("PROJECT_NOT_FOUND", "Project not found"))?;
    let members = store.members_of(&project.id).into_iter().map(|m| member_view(store, m)).collect();
    let issue_count = store.issue_count(&project.id);
    Ok(ProjectView { project, members, issue_count, access })
}

async fn list_projects(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Response> {
    let projects = get_user_projects(&state.store, &ctx)?;
    Ok(ok(projects).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    key: String,
    description: Option<String>,
    #[serde(rename = "type", default)]
    project_type: Option<ProjectType>,
}

async fn create_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateProjectPayload>, JsonRejection>,
) -> AppResult<Response> {
    let identity = ctx.identity()?.clone();
    let body = json_body(payload)?;
    if body.name.trim().is_empty() || body.key.trim().is_empty() {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Name and key are required"));
    }
    let new = NewProject {
        name: body.name,
        key: body.key,
        description: body.description,
        project_type: body.project_type.unwrap_or_default(),
    };
    let creator = identity.id.clone();
    let (project, _) = mutate(&state.store, move |s| s.create_project(new, &creator)).await?;
    info!(target: "projects", project = %project.id, key = %project.key, user = %identity.id, "project created");
    let view = project_view(&state.store.read(), ProjectAccess::for_role(project.id.clone(), ProjectRole::Admin))?;
    Ok(created(view).into_response())
}

async fn get_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<String>,
) -> AppResult<Response> {
    let access = require_project_access(&state.store, &ctx, Some(&project_id), ProjectRole::Viewer)?;
    Ok(ok(project_view(&state.store.read(), access)?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProjectPayload {
    name: Option<String>,
    key: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(rename = "type")]
    project_type: Option<ProjectType>,
}

async fn update_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<String>,
    payload: Result<Json<UpdateProjectPayload>, JsonRejection>,
) -> AppResult<Response> {
    let access = require_project_admin(&state.store, &ctx, Some(&project_id))?;
    let body = json_body(payload)?;
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&body.name) || blank(&body.key) {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Name and key cannot be empty"));
    }
    let update = ProjectUpdate { name: body.name, key: body.key, description: body.description, project_type: body.project_type };
    let project_id = access.project_id.clone();
    mutate(&state.store, move |s| s.update_project(&project_id, update)).await?;
    info!(target: "projects", project = %access.project_id, "project updated");
    Ok(ok(project_view(&state.store.read(), access)?).into_response())
}

async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<String>,
) -> AppResult<Response> {
    let access = require_project_access(&state.store, &ctx, Some(&project_id), ProjectRole::Viewer)?;
    let store = state.store.read();
    let members: Vec<MemberView> =
        store.members_of(&access.project_id).into_iter().map(|m| member_view(&store, m)).collect();
    Ok(ok(members).into_response())
}

/// Gate shared by the member-management routes.
fn member_admin(state: &AppState, ctx: &RequestContext, project_id: &str) -> AppResult<ProjectAccess> {
    let access = require_project_admin(&state.store, ctx, Some(project_id))?;
    can_manage_project_members(&access)?;
    Ok(access)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberPayload {
    email: Option<String>,
    user_id: Option<String>,
    role: Option<ProjectRole>,
}

async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<String>,
    payload: Result<Json<AddMemberPayload>, JsonRejection>,
) -> AppResult<Response> {
    let access = member_admin(&state, &ctx, &project_id)?;
    let body = json_body(payload)?;
    let user = {
        let store = state.store.read();
        let user = match (body.user_id.as_deref().map(str::trim), body.email.as_deref().map(str::trim)) {
            (Some(id), _) if !id.is_empty() => store.user(id).cloned(),
            (_, Some(email)) if !email.is_empty() => store.user_by_email(email).cloned(),
            _ => return Err(AppError::bad_request("VALIDATION_ERROR", "Email or userId is required")),
        };
        let user = user.ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "User not found"))?;
        if store.membership(&user.id, &access.project_id).is_some() {
            return Err(AppError::conflict("ALREADY_MEMBER", "User is already a member of this project"));
        }
        user
    };
    let (pid, uid, role) = (access.project_id.clone(), user.id.clone(), body.role.unwrap_or_default());
    let member = mutate(&state.store, move |s| s.add_member(&pid, &uid, role)).await?;
    info!(target: "projects", project = %access.project_id, user = %user.id, role = %member.role, "member added");
    Ok(created(member_view(&state.store.read(), member)).into_response())
}

/// The member row, provided it belongs to the project in the path.
fn member_in_project(store: &Store, project_id: &str, member_id: &str) -> AppResult<ProjectMember> {
    store
        .member(member_id)
        .filter(|m| m.project_id == project_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("MEMBER_NOT_FOUND", "Member not found"))
}

#[derive(Debug, Deserialize)]
struct UpdateMemberPayload {
    role: Option<ProjectRole>,
}

async fn update_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((project_id, member_id)): Path<(String, String)>,
    payload: Result<Json<UpdateMemberPayload>, JsonRejection>,
) -> AppResult<Response> {
    let access = member_admin(&state, &ctx, &project_id)?;
    let role = json_body(payload)?
        .role
        .ok_or_else(|| AppError::bad_request("VALIDATION_ERROR", "Role is required"))?;
    let existing = member_in_project(&state.store.read(), &access.project_id, &member_id)?;
    let member = mutate(&state.store, move |s| s.set_member_role(&existing.id, role)).await?;
    info!(target: "projects", project = %access.project_id, member = %member.id, role = %role, "member role changed");
    Ok(ok(member_view(&state.store.read(), member)).into_response())
}

async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((project_id, member_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let access = member_admin(&state, &ctx, &project_id)?;
    let existing = member_in_project(&state.store.read(), &access.project_id, &member_id)?;
    let removed = mutate(&state.store, move |s| s.remove_member(&existing.id)).await?;
    info!(target: "projects", project = %access.project_id, member = %removed.id, "member removed");
    Ok(message("Member removed successfully"))
}
