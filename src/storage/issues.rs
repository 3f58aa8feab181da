use chrono::Utc;

use super::{new_id, Issue, IssueStatus, IssueType, Priority, Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub issue_type: IssueType,
    pub status: IssueStatus,
    pub priority: Priority,
    pub reporter_id: String,
    pub assignee_id: Option<String>,
    pub estimate: Option<f64>,
    pub labels: Vec<String>,
}

/// Trim, drop blanks and duplicates; first occurrence wins.
pub fn normalize_labels(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub project_id: Option<String>,
    pub status: Option<IssueStatus>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
}

impl IssueFilter {
    fn matches(&self, issue: &Issue) -> bool {
        self.project_id.as_deref().map_or(true, |p| issue.project_id == p)
            && self.status.map_or(true, |s| issue.status == s)
            && self.issue_type.map_or(true, |t| issue.issue_type == t)
            && self.priority.map_or(true, |p| issue.priority == p)
    }
}

/// Partial issue edit. The nested options distinguish "leave as is" from "clear".
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub issue_type: Option<IssueType>,
    pub status: Option<IssueStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<Option<String>>,
    pub estimate: Option<Option<f64>>,
    pub labels: Option<Vec<String>>,
}

impl Store {
    pub fn create_issue(&mut self, new: NewIssue) -> Result<Issue, StoreError> {
        if self.project(&new.project_id).is_none() {
            return Err(StoreError::NotFound { entity: "project", id: new.project_id });
        }
        let now = Utc::now();
        let issue = Issue {
            id: new_id(),
            project_id: new.project_id,
            title: new.title.trim().to_string(),
            description: new.description,
            issue_type: new.issue_type,
            status: new.status,
            priority: new.priority,
            reporter_id: new.reporter_id,
            assignee_id: new.assignee_id,
            estimate: new.estimate,
            labels: normalize_labels(new.labels),
            created_at: now,
            updated_at: now,
        };
        self.tables.issues.insert(issue.id.clone(), issue.clone());
        Ok(issue)
    }

    pub fn issue(&self, id: &str) -> Option<&Issue> {
        self.tables.issues.get(id)
    }

    /// Matching issues, newest first.
    pub fn list_issues(&self, filter: &IssueFilter) -> Vec<Issue> {
        let mut out: Vec<Issue> = self.tables.issues.values().filter(|i| filter.matches(i)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn issue_count(&self, project_id: &str) -> usize {
        self.tables.issues.values().filter(|i| i.project_id == project_id).count()
    }

    pub fn update_issue(&mut self, id: &str, update: IssueUpdate) -> Result<Issue, StoreError> {
        let issue = self
            .tables
            .issues
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { entity: "issue", id: id.to_string() })?;
        if let Some(title) = update.title { issue.title = title.trim().to_string(); }
        if let Some(description) = update.description { issue.description = description; }
        if let Some(t) = update.issue_type { issue.issue_type = t; }
        if let Some(s) = update.status { issue.status = s; }
        if let Some(p) = update.priority { issue.priority = p; }
        if let Some(a) = update.assignee_id { issue.assignee_id = a; }
        if let Some(e) = update.estimate { issue.estimate = e; }
        if let Some(l) = update.labels { issue.labels = normalize_labels(l); }
        issue.updated_at = Utc::now();
        Ok(issue.clone())
    }

    /// Remove an issue together with its comments.
    pub fn delete_issue(&mut self, id: &str) -> Result<Issue, StoreError> {
        let removed = self
            .tables
            .issues
            .remove(id)
            .ok_or_else(|| StoreError::NotFound { entity: "issue", id: id.to_string() })?;
        self.tables.comments.retain(|_, c| c.issue_id != id);
        Ok(removed)
    }
}
