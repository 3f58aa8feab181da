//! `/api/issues`: issue listing, creation, edits and deletion.
//!
//! Listing, reading, editing and reading comments need any membership of the issue's project;
//! creating issues and posting comments need `member`; deleting needs the `admin` role exactly.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Json, Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::response::{created, double_option, json_body, message, mutate, ok, query_params};
use super::{require_auth, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{require_exact_role, require_project_access, require_project_member, ProjectRole, RequestContext};
use crate::storage::model::parse_wire;
use crate::storage::{
    Comment, Issue, IssueFilter, IssueStatus, IssueType, IssueUpdate, NewComment, NewIssue, Priority, Store, UserSummary,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_issues).post(create_issue))
        .route("/{id}", get(get_issue).put(update_issue).delete(delete_issue))
        .route("/{id}/comments", get(list_comments).post(add_comment))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

#[derive(Debug, Serialize)]
struct CommentView {
    #[serde(flatten)]
    comment: Comment,
    author: Option<UserSummary>,
}

fn comment_view(store: &Store, comment: Comment) -> CommentView {
    let author = store.user(&comment.author_id).map(UserSummary::from);
    CommentView { comment, author }
}

#[derive(Debug, Serialize)]
struct IssueView {
    #[serde(flatten)]
    issue: Issue,
    reporter: Option<UserSummary>,
    assignee: Option<UserSummary>,
    comments: Vec<CommentView>,
}

fn issue_view(store: &Store, issue: Issue) -> IssueView {
    let reporter = store.user(&issue.reporter_id).map(UserSummary::from);
    let assignee = issue.assignee_id.as_deref().and_then(|id| store.user(id)).map(UserSummary::from);
    let comments = store.comments_for(&issue.id).into_iter().map(|c| comment_view(store, c)).collect();
    IssueView { issue, reporter, assignee, comments }
}

fn load_issue(state: &AppState, id: &str) -> AppResult<Issue> {
    state
        .store
        .read()
        .issue(id)
        .cloned()
        .ok_or_else(|| AppError::not_found("ISSUE_NOT_FOUND", "Issue not found"))
}

/// Parse an optional wire value, naming the field in the 400 on failure.
fn parse_field<T: serde::de::DeserializeOwned>(field: &str, raw: Option<&str>) -> AppResult<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_wire(s)
            .map(Some)
            .ok_or_else(|| AppError::bad_request("VALIDATION_ERROR".to_string(), format!("Invalid {field}: {s}"))),
    }
}

fn ensure_assignable(store: &Store, project_id: &str, assignee: Option<&str>) -> AppResult<()> {
    match assignee {
        Some(id) if store.membership(id, project_id).is_none() => {
            Err(AppError::bad_request("INVALID_ASSIGNEE", "Assignee must be a member of the project"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueQuery {
    project_id: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    priority: Option<String>,
}

async fn list_issues(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    params: Result<Query<IssueQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query_params(params)?;
    let access = require_project_access(&state.store, &ctx, q.project_id.as_deref(), ProjectRole::Viewer)?;
    let filter = IssueFilter {
        project_id: Some(access.project_id),
        status: parse_field::<IssueStatus>("status", q.status.as_deref())?,
        issue_type: parse_field::<IssueType>("type", q.issue_type.as_deref())?,
        priority: parse_field::<Priority>("priority", q.priority.as_deref())?,
    };
    let store = state.store.read();
    let issues: Vec<IssueView> = store.list_issues(&filter).into_iter().map(|i| issue_view(&store, i)).collect();
    Ok(ok(issues).into_response())
}

async fn get_issue(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    ctx.identity()?;
    let issue = load_issue(&state, &id)?;
    require_project_access(&state.store, &ctx, Some(&issue.project_id), ProjectRole::Viewer)?;
    Ok(ok(issue_view(&state.store.read(), issue)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssuePayload {
    project_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    assignee_id: Option<String>,
    estimate: Option<f64>,
    #[serde(default)]
    labels: Vec<String>,
}

async fn create_issue(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateIssuePayload>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(payload)?;
    let access = require_project_member(&state.store, &ctx, body.project_id.as_deref())?;
    let reporter = ctx.identity()?;

    let title = body.title.as_deref().map(str::trim).unwrap_or_default();
    let issue_type = parse_field::<IssueType>("type", body.issue_type.as_deref())?;
    let Some(issue_type) = issue_type.filter(|_| !title.is_empty()) else {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Title, type, and projectId are required"));
    };
    let status = parse_field::<IssueStatus>("status", body.status.as_deref())?.unwrap_or_default();
    let priority = parse_field::<Priority>("priority", body.priority.as_deref())?.unwrap_or_default();
    let assignee_id = body.assignee_id.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());

    ensure_assignable(&state.store.read(), &access.project_id, assignee_id.as_deref())?;
    let new = NewIssue {
        project_id: access.project_id.clone(),
        title: title.to_string(),
        description: body.description,
        issue_type,
        status,
        priority,
        reporter_id: reporter.id.clone(),
        assignee_id,
        estimate: body.estimate,
        labels: body.labels,
    };
    let issue = mutate(&state.store, move |s| s.create_issue(new)).await?;
    info!(target: "issues", issue = %issue.id, project = %issue.project_id, user = %reporter.id, "issue created");
    Ok(created(issue_view(&state.store.read(), issue)).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateIssuePayload {
    title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    assignee_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    estimate: Option<Option<f64>>,
    labels: Option<Vec<String>>,
}

async fn update_issue(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateIssuePayload>, JsonRejection>,
) -> AppResult<Response> {
    ctx.identity()?;
    let issue = load_issue(&state, &id)?;
    let access = require_project_access(&state.store, &ctx, Some(&issue.project_id), ProjectRole::Viewer)?;
    let body = json_body(payload)?;
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Title cannot be empty"));
    }
    let update = IssueUpdate {
        title: body.title,
        description: body.description,
        issue_type: parse_field::<IssueType>("type", body.issue_type.as_deref())?,
        status: parse_field::<IssueStatus>("status", body.status.as_deref())?,
        priority: parse_field::<Priority>("priority", body.priority.as_deref())?,
        assignee_id: body.assignee_id.map(|a| a.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())),
        estimate: body.estimate,
        labels: body.labels,
    };

    if let Some(Some(assignee)) = update.assignee_id.as_ref() {
        ensure_assignable(&state.store.read(), &access.project_id, Some(assignee.as_str()))?;
    }
    let updated = mutate(&state.store, move |s| s.update_issue(&issue.id, update)).await?;
    info!(target: "issues", issue = %updated.id, project = %updated.project_id, "issue updated");
    Ok(ok(issue_view(&state.store.read(), updated)).into_response())
}

async fn delete_issue(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    ctx.identity()?;
    let issue = load_issue(&state, &id)?;
    let access = require_project_access(&state.store, &ctx, Some(&issue.project_id), ProjectRole::Viewer)?;
    require_exact_role(&access, ProjectRole::Admin)?;
    let removed = mutate(&state.store, move |s| s.delete_issue(&issue.id)).await?;
    info!(target: "issues", issue = %removed.id, project = %removed.project_id, "issue deleted");
    Ok(message("Issue deleted successfully"))
}

async fn list_comments(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    ctx.identity()?;
    let issue = load_issue(&state, &id)?;
    require_project_access(&state.store, &ctx, Some(&issue.project_id), ProjectRole::Viewer)?;
    let store = state.store.read();
    let comments: Vec<CommentView> = store.comments_for(&issue.id).into_iter().map(|c| comment_view(&store, c)).collect();
    Ok(ok(comments).into_response())
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    #[serde(default)]
    content: String,
}

async fn add_comment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    payload: Result<Json<CommentPayload>, JsonRejection>,
) -> AppResult<Response> {
    ctx.identity()?;
    let issue = load_issue(&state, &id)?;
    require_project_member(&state.store, &ctx, Some(&issue.project_id))?;
    let author = ctx.identity()?.id.clone();
    let body = json_body(payload)?;
    if body.content.trim().is_empty() {
        return Err(AppError::bad_request("VALIDATION_ERROR", "Content is required"));
    }
    let new = NewComment { issue_id: issue.id, author_id: author.clone(), content: body.content };
    let comment = mutate(&state.store, move |s| s.add_comment(new)).await?;
    info!(target: "issues", issue = %comment.issue_id, comment = %comment.id, user = %author, "comment added");
    Ok(created(comment_view(&state.store.read(), comment)).into_response())
}
