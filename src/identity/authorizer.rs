//! Project-scoped authorization.
//!
//! Every project gate resolves `(caller, projectId)` against the `MembershipDirectory` and compares the
//! member's role with the required minimum on the `viewer < member < admin` order. A passing gate returns
//! a `ProjectAccess` capability value; checks that build on it (`can_manage_project_members`) take that
//! value as input and so cannot run before the gate.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RequestContext;
use crate::error::{AppError, AppResult};
use crate::storage::{MembershipDirectory, Project};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Viewer = 0,
    #[default]
    Member = 1,
    Admin = 2,
}

impl ProjectRole {
    pub const ALL: [ProjectRole; 3] = [ProjectRole::Viewer, ProjectRole::Member, ProjectRole::Admin];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn at_least(self, min: ProjectRole) -> bool {
        self.ordinal() >= min.ordinal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectRole::Viewer => "viewer",
            ProjectRole::Member => "member",
            ProjectRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(ProjectRole::Viewer),
            "member" => Some(ProjectRole::Member),
            "admin" => Some(ProjectRole::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller may do inside one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAccess {
    pub project_id: String,
    pub role: ProjectRole,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_manage_members: bool,
}

impl ProjectAccess {
    pub fn for_role(project_id: impl Into<String>, role: ProjectRole) -> Self {
        Self {
            project_id: project_id.into(),
            role,
            can_edit: role.at_least(ProjectRole::Member),
            can_delete: role.at_least(ProjectRole::Admin),
            can_manage_members: role.at_least(ProjectRole::Admin),
        }
    }
}

/// Gate a project-scoped operation on the caller's membership role.
///
/// `project_id` is whatever the route could determine (path parameter, query or body); `None` or an
/// empty id is a 400.
pub fn require_project_access(
    dir: &dyn MembershipDirectory,
    ctx: &RequestContext,
    project_id: Option<&str>,
    min_role: ProjectRole,
) -> AppResult<ProjectAccess> {
    let identity = ctx.identity()?;
    let project_id = project_id
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("PROJECT_ID_REQUIRED", "Project ID required"))?;
    let Some(membership) = dir.membership(&identity.id, project_id)? else {
        debug!(target: "authz", user = %identity.id, project = project_id, "not a member");
        return Err(AppError::forbidden("NOT_A_MEMBER", "Access denied: You are not a member of this project"));
    };
    if !membership.role.at_least(min_role) {
        debug!(target: "authz", user = %identity.id, project = project_id, role = %membership.role, required = %min_role, "insufficient role");
        return Err(AppError::forbidden("INSUFFICIENT_ROLE".to_string(), format!("Access denied: {min_role} role required")));
    }
    Ok(ProjectAccess::for_role(project_id, membership.role))
}

pub fn require_project_admin(dir: &dyn MembershipDirectory, ctx: &RequestContext, project_id: Option<&str>) -> AppResult<ProjectAccess> {
    require_project_access(dir, ctx, project_id, ProjectRole::Admin)
}

pub fn require_project_member(dir: &dyn MembershipDirectory, ctx: &RequestContext, project_id: Option<&str>) -> AppResult<ProjectAccess> {
    require_project_access(dir, ctx, project_id, ProjectRole::Member)
}

/// Exact-role check on an already granted access (used where `>=` is deliberately not enough).
pub fn require_exact_role(access: &ProjectAccess, role: ProjectRole) -> AppResult<()> {
    if access.role == role {
        return Ok(());
    }
    Err(AppError::forbidden("INSUFFICIENT_ROLE".to_string(), format!("Access denied: {role} role required")))
}

pub fn can_manage_project_members(access: &ProjectAccess) -> AppResult<()> {
    if access.can_manage_members {
        return Ok(());
    }
    Err(AppError::forbidden("CANNOT_MANAGE_MEMBERS", "Access denied: Project admin role required"))
}

/// A project as listed for its member, tagged with the member's role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProject {
    #[serde(flatten)]
    pub project: Project,
    pub role: ProjectRole,
}

/// The caller's projects (never a global listing), oldest membership first.
pub fn get_user_projects(dir: &dyn MembershipDirectory, ctx: &RequestContext) -> AppResult<Vec<UserProject>> {
    let identity = ctx.identity()?;
    let rows = dir.projects_for_user(&identity.id)?;
    Ok(rows.into_iter().map(|(m, project)| UserProject { project, role: m.role }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::storage::{ProjectMember, ProjectType, StoreError};
    use chrono::Utc;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDirectory {
        rows: HashMap<(String, String), ProjectRole>,
    }

    impl FakeDirectory {
        fn with(mut self, user: &str, project: &str, role: ProjectRole) -> Self {
            self.rows.insert((user.to_string(), project.to_string()), role);
            self
        }
    }

    impl MembershipDirectory for FakeDirectory {
        fn membership(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>, StoreError> {
            Ok(self.rows.get(&(user_id.to_string(), project_id.to_string())).map(|role| ProjectMember {
                id: format!("m-{user_id}-{project_id}"),
                user_id: user_id.to_string(),
                project_id: project_id.to_string(),
                role: *role,
                created_at: Utc::now(),
            }))
        }

        fn projects_for_user(&self, user_id: &str) -> Result<Vec<(ProjectMember, Project)>, StoreError> {
            let mut out = Vec::new();
            for ((u, p), role) in &self.rows {
                if u != user_id {
                    continue;
                }
                let now = Utc::now();
                let member = ProjectMember { id: format!("m-{u}-{p}"), user_id: u.clone(), project_id: p.clone(), role: *role, created_at: now };
                let project = Project {
                    id: p.clone(),
                    name: format!("Project {p}"),
                    key: p.to_ascii_uppercase(),
                    description: None,
                    project_type: ProjectType::Scrum,
                    created_at: now,
                    updated_at: now,
                };
                out.push((member, project));
            }
            out.sort_by(|a, b| a.1.id.cmp(&b.1.id));
            Ok(out)
        }
    }

    fn ctx_for(user: &str) -> RequestContext {
        RequestContext::authenticated(
            Identity { id: user.into(), email: format!("{user}@example.com"), name: user.into(), avatar_url: None, is_active: true },
            "req-1",
        )
    }

    #[test]
    fn role_order_is_total() {
        assert!(ProjectRole::Viewer < ProjectRole::Member && ProjectRole::Member < ProjectRole::Admin);
        assert_eq!(ProjectRole::Admin.ordinal(), 2);
        assert_eq!(ProjectRole::parse(" Admin "), Some(ProjectRole::Admin));
        assert_eq!(ProjectRole::parse("owner"), None);
        assert_eq!(serde_json::to_value(ProjectRole::Viewer).unwrap(), "viewer");
    }

    #[test]
    fn gate_failures_map_to_expected_statuses() {
        let dir = FakeDirectory::default().with("alice", "p1", ProjectRole::Viewer);

        let err = require_project_access(&dir, &RequestContext::anonymous("r"), Some("p1"), ProjectRole::Viewer).unwrap_err();
        assert_eq!(err.http_status(), 401);

        let err = require_project_access(&dir, &ctx_for("alice"), None, ProjectRole::Viewer).unwrap_err();
        assert_eq!((err.http_status(), err.code_str()), (400, "PROJECT_ID_REQUIRED"));
        assert_eq!(require_project_access(&dir, &ctx_for("alice"), Some("  "), ProjectRole::Viewer).unwrap_err().http_status(), 400);

        let err = require_project_access(&dir, &ctx_for("bob"), Some("p1"), ProjectRole::Viewer).unwrap_err();
        assert_eq!((err.http_status(), err.code_str()), (403, "NOT_A_MEMBER"));

        let err = require_project_member(&dir, &ctx_for("alice"), Some("p1")).unwrap_err();
        assert_eq!((err.http_status(), err.code_str()), (403, "INSUFFICIENT_ROLE"));
        assert_eq!(err.message(), "Access denied: member role required");
    }

    #[test]
    fn capabilities_follow_role() {
        let v = ProjectAccess::for_role("p", ProjectRole::Viewer);
        assert!(!v.can_edit && !v.can_delete && !v.can_manage_members);
        let m = ProjectAccess::for_role("p", ProjectRole::Member);
        assert!(m.can_edit && !m.can_delete && !m.can_manage_members);
        let a = ProjectAccess::for_role("p", ProjectRole::Admin);
        assert!(a.can_edit && a.can_delete && a.can_manage_members);

        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["canEdit"], false);
        assert_eq!(json["role"], "viewer");

        assert_eq!(can_manage_project_members(&m).unwrap_err().code_str(), "CANNOT_MANAGE_MEMBERS");
        assert!(can_manage_project_members(&a).is_ok());
    }

    #[test]
    fn non_members_are_denied_at_every_level() {
        let dir = FakeDirectory::default().with("alice", "p1", ProjectRole::Admin);
        for min in ProjectRole::ALL {
            let err = require_project_access(&dir, &ctx_for("mallory"), Some("p1"), min).unwrap_err();
            assert_eq!(err.http_status(), 403);
            // Admin elsewhere does not help.
            let err = require_project_access(&dir, &ctx_for("alice"), Some("p2"), min).unwrap_err();
            assert_eq!(err.http_status(), 403);
        }
    }

    #[test]
    fn gates_are_monotone_in_required_role() {
        for actual in ProjectRole::ALL {
            let dir = FakeDirectory::default().with("u", "p", actual);
            for r1 in ProjectRole::ALL {
                for r2 in ProjectRole::ALL {
                    if r1 > r2 {
                        continue;
                    }
                    let high = require_project_access(&dir, &ctx_for("u"), Some("p"), r2).is_ok();
                    let low = require_project_access(&dir, &ctx_for("u"), Some("p"), r1).is_ok();
                    assert!(!high || low, "actual={actual} r1={r1} r2={r2}");
                }
                assert_eq!(require_project_access(&dir, &ctx_for("u"), Some("p"), r1).is_ok(), actual >= r1);
            }
        }
    }

    #[test]
    fn exact_role_rejects_higher_or_lower() {
        let admin = ProjectAccess::for_role("p", ProjectRole::Admin);
        let member = ProjectAccess::for_role("p", ProjectRole::Member);
        assert!(require_exact_role(&admin, ProjectRole::Admin).is_ok());
        assert_eq!(require_exact_role(&member, ProjectRole::Admin).unwrap_err().http_status(), 403);
        assert!(require_exact_role(&admin, ProjectRole::Member).is_err());
    }

    #[test]
    fn user_projects_carry_caller_role() {
        let dir = FakeDirectory::default()
            .with("alice", "p1", ProjectRole::Admin)
            .with("alice", "p2", ProjectRole::Viewer)
            .with("bob", "p3", ProjectRole::Member);
        let list = get_user_projects(&dir, &ctx_for("alice")).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!((list[0].project.id.as_str(), list[0].role), ("p1", ProjectRole::Admin));
        assert_eq!((list[1].project.id.as_str(), list[1].role), ("p2", ProjectRole::Viewer));

        let json = serde_json::to_value(&list[1]).unwrap();
        assert_eq!(json["role"], "viewer");
        assert_eq!(json["key"], "P2");

        assert_eq!(get_user_projects(&dir, &RequestContext::anonymous("r")).unwrap_err().http_status(), 401);
    }
}
