use chrono::Utc;

use super::{new_id, Comment, Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewComment {
    pub issue_id: String,
    pub author_id: String,
    pub content: String,
}

impl Store {
    pub fn add_comment(&mut self, new: NewComment) -> Result<Comment, StoreError> {
        if self.issue(&new.issue_id).is_none() {
            return Err(StoreError::NotFound { entity: "issue", id: new.issue_id });
        }
        let now = Utc::now();
        let comment = Comment {
            id: new_id(),
            issue_id: new.issue_id,
            author_id: new.author_id,
            content: new.content.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tables.comments.insert(comment.id.clone(), comment.clone());
        Ok(comment)
    }

    /// Comments on an issue, oldest first.
    pub fn comments_for(&self, issue_id: &str) -> Vec<Comment> {
        let mut out: Vec<Comment> = self.tables.comments.values().filter(|c| c.issue_id == issue_id).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}
