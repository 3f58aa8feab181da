//! Identity, sessions and project-scoped authorization.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;
mod authenticator;
mod authorizer;

pub use principal::{Identity, DEMO_USER_ID};
pub use session::{SessionClaims, TokenError, TokenService, TokenSubject, SESSION_TTL_DAYS};
pub use provider::{AuthProvider, LocalAuthProvider, LoginRequest, LoginResponse, RegisterRequest};
pub use request_context::RequestContext;
pub use authenticator::{bearer_token, AuthOutcome, Authenticator, Rejection};
pub use authorizer::{
    can_manage_project_members, get_user_projects, require_exact_role, require_project_access,
    require_project_admin, require_project_member, ProjectAccess, ProjectRole, UserProject,
};
