//!
//! opensprint storage module
//! -------------------------
//! The tracker keeps its tables (users, projects, project members, issues, comments) in memory behind
//! a `parking_lot::RwLock`. When a snapshot path is configured every committed mutation rewrites a JSON
//! snapshot of all tables (temp file + rename) and startup reloads it, so a restart keeps its data.
//!
//! Mutations go through `SharedStore::write`: the change is staged on a copy of the tables, the copy is
//! written to disk, and only then swapped in. A failed snapshot write leaves memory untouched. Commits
//! are serialized by their own mutex, so readers never wait on disk I/O.
//!
//! A persisted store holds an exclusive lock file next to its snapshot for as long as it is open, so a
//! second process (the admin CLI while a server is running) fails instead of silently diverging.
//!
//! Two narrow read traits sit in front of the tables: `CredentialStore` (what the authenticator
//! needs) and `MembershipDirectory` (what the access evaluator needs).

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::AppError;

pub mod model;
mod comments;
mod issues;
mod projects;
mod users;

pub use comments::NewComment;
pub use issues::{normalize_labels, IssueFilter, IssueUpdate, NewIssue};
pub use model::{Comment, Issue, IssueStatus, IssueType, Priority, Project, ProjectMember, ProjectType, User, UserSummary};
pub use projects::{NewProject, ProjectUpdate};
pub use users::{NewUser, ProfileUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} already exists: {key}")]
    UniqueViolation { entity: &'static str, key: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("project {project_id} must keep at least one admin")]
    LastAdmin { project_id: String },

    #[error("data directory is in use by another process (lock held on {})", .path.display())]
    Locked { path: PathBuf },

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { .. } => AppError::conflict("CONFLICT".to_string(), err.to_string()),
            StoreError::NotFound { .. } => AppError::not_found("NOT_FOUND".to_string(), err.to_string()),
            StoreError::LastAdmin { .. } => {
                AppError::conflict("LAST_ADMIN", "A project must keep at least one admin")
            }
            StoreError::Locked { .. } | StoreError::Io(_) | StoreError::Serialization(_) => {
                AppError::internal("STORE_ERROR".to_string(), err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    pub(crate) users: BTreeMap<String, User>,
    #[serde(default)]
    pub(crate) projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub(crate) members: BTreeMap<String, ProjectMember>,
    #[serde(default)]
    pub(crate) issues: BTreeMap<String, Issue>,
    #[serde(default)]
    pub(crate) comments: BTreeMap<String, Comment>,
}

/// The tracker tables. Pure in-memory state; persistence lives in `SharedStore`.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub(crate) tables: Tables,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::default()
    }
}

/// JSON snapshot file holding every table.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the tables, or an empty store when no snapshot exists yet.
    pub fn load(&self) -> Result<Store, StoreError> {
        if !self.path.exists() {
            info!(target: "storage", "no snapshot at {}; starting empty", self.path.display());
            return Ok(Store::default());
        }
        let bytes = std::fs::read(&self.path)?;
        let t: Tables = serde_json::from_slice(&bytes)?;
        info!(
            target: "storage",
            "loaded snapshot {}: users={}, projects={}, members={}, issues={}, comments={}",
            self.path.display(), t.users.len(), t.projects.len(), t.members.len(), t.issues.len(), t.comments.len()
        );
        Ok(Store { tables: t })
    }

    pub fn write(&self, store: &Store) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&store.tables)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(target: "storage", "snapshot written to {}", self.path.display());
        Ok(())
    }
}

/// Exclusive advisory lock on a data directory, held until dropped.
pub struct DataDirLock {
    _file: fd_lock::RwLock<File>,
    path: PathBuf,
}

impl DataDirLock {
    /// Take the lock that guards `snapshot`; `StoreError::Locked` when another holder has it.
    pub fn acquire(snapshot: &Path) -> Result<Self, StoreError> {
        let path = snapshot.with_extension("lock");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).truncate(false).write(true).open(&path)?;
        let mut lock = fd_lock::RwLock::new(file);
        match lock.try_write() {
            // Released when the file handle closes.
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(StoreError::Locked { path }),
            Err(e) => return Err(e.into()),
        }
        debug!(target: "storage", "acquired {}", path.display());
        Ok(Self { _file: lock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DataDirLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataDirLock({})", self.path.display())
    }
}

/// Thread-safe handle shared by all request handlers.
#[derive(Clone, Debug)]
pub struct SharedStore {
    state: Arc<RwLock<Store>>,
    commit: Arc<Mutex<Option<Snapshot>>>,
    _lock: Option<Arc<DataDirLock>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self { state: Arc::new(RwLock::new(store)), commit: Arc::new(Mutex::new(None)), _lock: None }
    }

    pub fn in_memory() -> Self {
        Self::new(Store::in_memory())
    }

    /// Lock the data directory of `path` and load its snapshot. Fails while another process has it open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let snapshot = Snapshot::new(path);
        let lock = DataDirLock::acquire(snapshot.path())?;
        let store = snapshot.load()?;
        Ok(Self {
            state: Arc::new(RwLock::new(store)),
            commit: Arc::new(Mutex::new(Some(snapshot))),
            _lock: Some(Arc::new(lock)),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.state.read()
    }

    /// Apply `f` to a staged copy of the tables, persist it, then publish it.
    ///
    /// Nothing changes when `f` or the snapshot write fails.
    pub fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Store) -> Result<T, StoreError>,
    {
        let snapshot = self.commit.lock();
        let mut staged = self.state.read().clone();
        let out = f(&mut staged)?;
        if let Some(s) = snapshot.as_ref() {
            s.write(&staged)?;
        }
        *self.state.write() = staged;
        Ok(out)
    }
}

/// Read access to persisted user records, keyed by id or email.
pub trait CredentialStore: Send + Sync {
    fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

/// Read access to the `(userId, projectId) -> role` mapping.
pub trait MembershipDirectory: Send + Sync {
    fn membership(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>, StoreError>;
    /// Every membership of `user_id`, joined to its project.
    fn projects_for_user(&self, user_id: &str) -> Result<Vec<(ProjectMember, Project)>, StoreError>;
}

impl CredentialStore for SharedStore {
    fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read().user(id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read().user_by_email(email).cloned())
    }
}

impl MembershipDirectory for SharedStore {
    fn membership(&self, user_id: &str, project_id: &str) -> Result<Option<ProjectMember>, StoreError> {
        Ok(self.read().membership(user_id, project_id).cloned())
    }

    fn projects_for_user(&self, user_id: &str) -> Result<Vec<(ProjectMember, Project)>, StoreError> {
        let guard = self.read();
        let out = guard
            .memberships_of_user(user_id)
            .into_iter()
            .filter_map(|m| guard.project(&m.project_id).cloned().map(|p| (m, p)))
            .collect();
        Ok(out)
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProjectRole;
    use tempfile::tempdir;

    fn new_user(email: &str) -> NewUser {
        NewUser { email: email.into(), name: "Tester".into(), password_hash: "x".into(), avatar_url: None }
    }

    fn new_project(key: &str) -> NewProject {
        NewProject { name: "Alpha".into(), key: key.into(), description: None, project_type: ProjectType::Kanban }
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data").join("opensprint.json");
        {
            let store = SharedStore::open(&path).unwrap();
            let u = store.write(|s| s.create_user(new_user("a@example.com"))).unwrap();
            store.write(|s| s.create_project(new_project("ALP"), &u.id)).unwrap();
        }
        assert!(path.exists());
        let reopened = SharedStore::open(&path).unwrap();
        let guard = reopened.read();
        let u = guard.user_by_email("a@example.com").unwrap();
        let projects = guard.memberships_of_user(&u.id);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].role, ProjectRole::Admin);
    }

    #[test]
    fn failed_snapshot_write_leaves_memory_untouched() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("opensprint.json");
        let store = SharedStore::open(&path).unwrap();
        // A directory where the temp file should go makes every write fail.
        let blocker = path.with_extension("json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = store.write(|s| s.create_user(new_user("a@example.com"))).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.read().user_by_email("a@example.com").is_none());

        std::fs::remove_dir(&blocker).unwrap();
        let u = store.write(|s| s.create_user(new_user("a@example.com"))).unwrap();
        assert_eq!(u.email, "a@example.com");
    }

    #[test]
    fn failed_closure_discards_partial_changes() {
        let store = SharedStore::in_memory();
        let err = store
            .write(|s| {
                s.create_user(new_user("a@example.com"))?;
                s.create_user(new_user("a@example.com"))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
        assert!(store.read().user_by_email("a@example.com").is_none());
    }

    #[test]
    fn second_opener_of_a_data_dir_is_refused() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("opensprint.json");
        let server = SharedStore::open(&path).unwrap();
        let uid = server.write(|s| s.create_user(new_user("victim@example.com"))).unwrap().id;

        // An offline edit while the data dir is held must fail rather than be overwritten later.
        let err = SharedStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
        assert!(err.to_string().contains("opensprint.lock"));

        server.write(|s| s.create_user(new_user("other@example.com"))).unwrap();
        drop(server);

        let admin = SharedStore::open(&path).unwrap();
        admin.write(|s| s.set_user_active_by_email("victim@example.com", false)).unwrap();
        drop(admin);

        let restarted = SharedStore::open(&path).unwrap();
        assert!(!restarted.read().user(&uid).unwrap().is_active);
        assert!(restarted.read().user_by_email("other@example.com").is_some());
    }

    #[test]
    fn store_errors_map_to_http_statuses() {
        let e: AppError = StoreError::UniqueViolation { entity: "user", key: "a@example.com".into() }.into();
        assert_eq!(e.http_status(), 409);
        let e: AppError = StoreError::NotFound { entity: "issue", id: "i1".into() }.into();
        assert_eq!(e.http_status(), 404);
        let e: AppError = StoreError::LastAdmin { project_id: "p1".into() }.into();
        assert_eq!((e.http_status(), e.code_str()), (409, "LAST_ADMIN"));
        let e: AppError = StoreError::Io(std::io::Error::other("disk full")).into();
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn membership_directory_joins_projects() {
        let shared = SharedStore::in_memory();
        let (uid, pid) = shared
            .write(|s| {
                let u = s.create_user(new_user("b@example.com"))?;
                let (p, _) = s.create_project(new_project("BET"), &u.id)?;
                Ok((u.id, p.id))
            })
            .unwrap();
        let rows = shared.projects_for_user(&uid).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.id, pid);
        assert!(shared.membership(&uid, &pid).unwrap().is_some());
        assert!(shared.membership("nobody", &pid).unwrap().is_none());
    }
}
