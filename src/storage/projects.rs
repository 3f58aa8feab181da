use chrono::Utc;

use super::{new_id, Project, ProjectMember, ProjectType, Store, StoreError};
use crate::identity::ProjectRole;

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub key: String,
    pub description: Option<String>,
    pub project_type: ProjectType,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub key: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub project_type: Option<ProjectType>,
}

impl Store {
    /// Insert a project and its creator's admin membership as one step.
    pub fn create_project(&mut self, new: NewProject, creator_id: &str) -> Result<(Project, ProjectMember), StoreError> {
        let key = new.key.trim().to_string();
        self.ensure_key_free(&key, None)?;
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: new.name.trim().to_string(),
            key,
            description: new.description,
            project_type: new.project_type,
            created_at: now,
            updated_at: now,
        };
        let member = ProjectMember {
            id: new_id(),
            user_id: creator_id.to_string(),
            project_id: project.id.clone(),
            role: ProjectRole::Admin,
            created_at: now,
        };
        self.tables.projects.insert(project.id.clone(), project.clone());
        self.tables.members.insert(member.id.clone(), member.clone());
        Ok((project, member))
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.tables.projects.get(id)
    }

    pub fn update_project(&mut self, id: &str, update: ProjectUpdate) -> Result<Project, StoreError> {
        if let Some(key) = update.key.as_deref() {
            self.ensure_key_free(key.trim(), Some(id))?;
        }
        let project = self
            .tables
            .projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { entity: "project", id: id.to_string() })?;
        if let Some(name) = update.name { project.name = name.trim().to_string(); }
        if let Some(key) = update.key { project.key = key.trim().to_string(); }
        if let Some(description) = update.description { project.description = description; }
        if let Some(t) = update.project_type { project.project_type = t; }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    fn ensure_key_free(&self, key: &str, except: Option<&str>) -> Result<(), StoreError> {
        let taken = self
            .tables
            .projects
            .values()
            .any(|p| p.key.eq_ignore_ascii_case(key) && Some(p.id.as_str()) != except);
        if taken {
            return Err(StoreError::UniqueViolation { entity: "project key", key: key.to_string() });
        }
        Ok(())
    }

    pub fn membership(&self, user_id: &str, project_id: &str) -> Option<&ProjectMember> {
        self.tables.members.values().find(|m| m.user_id == user_id && m.project_id == project_id)
    }

    pub fn member(&self, member_id: &str) -> Option<&ProjectMember> {
        self.tables.members.get(member_id)
    }

    /// Members of a project, oldest first.
    pub fn members_of(&self, project_id: &str) -> Vec<ProjectMember> {
        let mut out: Vec<ProjectMember> =
            self.tables.members.values().filter(|m| m.project_id == project_id).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn memberships_of_user(&self, user_id: &str) -> Vec<ProjectMember> {
        let mut out: Vec<ProjectMember> =
            self.tables.members.values().filter(|m| m.user_id == user_id).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn add_member(&mut self, project_id: &str, user_id: &str, role: ProjectRole) -> Result<ProjectMember, StoreError> {
        if self.project(project_id).is_none() {
            return Err(StoreError::NotFound { entity: "project", id: project_id.to_string() });
        }
        if self.membership(user_id, project_id).is_some() {
            return Err(StoreError::UniqueViolation { entity: "project member", key: format!("{user_id}/{project_id}") });
        }
        let member = ProjectMember {
            id: new_id(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            role,
            created_at: Utc::now(),
        };
        self.tables.members.insert(member.id.clone(), member.clone());
        Ok(member)
    }

    pub fn set_member_role(&mut self, member_id: &str, role: ProjectRole) -> Result<ProjectMember, StoreError> {
        let current = self
            .member(member_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { entity: "project member", id: member_id.to_string() })?;
        if role != ProjectRole::Admin {
            self.ensure_other_admin(&current)?;
        }
        let member = self
            .tables
            .members
            .get_mut(member_id)
            .ok_or_else(|| StoreError::NotFound { entity: "project member", id: member_id.to_string() })?;
        member.role = role;
        Ok(member.clone())
    }

    pub fn remove_member(&mut self, member_id: &str) -> Result<ProjectMember, StoreError> {
        let current = self
            .member(member_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { entity: "project member", id: member_id.to_string() })?;
        self.ensure_other_admin(&current)?;
        self.tables.members.remove(member_id);
        Ok(current)
    }

    /// A project always keeps at least one admin; `leaving` may only stop being one if another exists.
    fn ensure_other_admin(&self, leaving: &ProjectMember) -> Result<(), StoreError> {
        if leaving.role != ProjectRole::Admin {
            return Ok(());
        }
        let others = self
            .tables
            .members
            .values()
            .filter(|m| m.project_id == leaving.project_id && m.role == ProjectRole::Admin && m.id != leaving.id)
            .count();
        if others == 0 {
            return Err(StoreError::LastAdmin { project_id: leaving.project_id.clone() });
        }
        Ok(())
    }
}
