//! Pluggable task storage.
//!
//! Defines the [`TaskStore`] trait so the local relational store and the
//! hosted realtime database can be swapped via configuration.

pub mod firebase;
pub mod sqlite;

use std::cmp::Ordering;

use thiserror::Error;

use crate::schema::{LabeledValue, ParsedTask, SaveOutcome, TaskGroup, VoteKind, VoteTally};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Optimistic write kept losing to concurrent writers.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote database error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Address of one result inside one stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub task_id: String,
    pub version_id: String,
    pub idx: usize,
}

impl ResultRef {
    pub fn new(task_id: impl Into<String>, version_id: impl Into<String>, idx: usize) -> Self {
        Self {
            task_id: task_id.into(),
            version_id: version_id.into(),
            idx,
        }
    }
}

impl std::fmt::Display for ResultRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.task_id, self.version_id, self.idx)
    }
}

/// Async trait implemented by each storage backend.
///
/// Every mutation is atomic with respect to the backing database. User
/// identities are expected already normalized (trimmed, lowercased).
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store a new version of the parsed task.
    async fn save_version(&self, parsed: &ParsedTask, submitted_by: &str)
        -> StoreResult<SaveOutcome>;

    /// The `limit` greatest task ids under [`key_order`], greatest first.
    async fn recent_tasks(&self, limit: usize) -> StoreResult<Vec<TaskGroup>>;

    async fn task(&self, task_id: &str) -> StoreResult<Option<TaskGroup>>;

    /// Replace a result's ratings. Only the version's author may do this.
    async fn edit_ratings(
        &self,
        target: &ResultRef,
        new_ratings: &[LabeledValue],
        user: &str,
    ) -> StoreResult<()>;

    /// Attach a note to a result and return the new note id.
    async fn add_note(&self, target: &ResultRef, user: &str, text: &str) -> StoreResult<String>;

    /// Remove a note. Only the note's author may do this.
    async fn delete_note(&self, target: &ResultRef, note_id: &str, user: &str) -> StoreResult<()>;

    /// Toggle a vote and return the updated counts.
    async fn vote(&self, target: &ResultRef, user: &str, kind: VoteKind) -> StoreResult<VoteTally>;
}

/// Shared validation for note text.
pub(crate) fn validate_note(text: &str) -> StoreResult<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Invalid("Note text is empty".to_string()));
    }
    Ok(text)
}

/// Key order of the hosted database, shared by both backends: keys that are
/// canonical 32-bit integers come first in numeric order, then every other
/// key in string order.
pub fn key_order(a: &str, b: &str) -> Ordering {
    fn as_int(key: &str) -> Option<i32> {
        key.parse::<i32>().ok().filter(|n| n.to_string() == key)
    }

    match (as_int(a), as_int(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order() {
        let mut keys = vec!["b", "10", "A-1", "9", "-3", "007", "2147483648"];
        keys.sort_by(|a, b| key_order(a, b));
        // "007" and out-of-range numbers are plain strings.
        assert_eq!(keys, vec!["-3", "9", "10", "007", "2147483648", "A-1", "b"]);
    }

    #[test]
    fn test_validate_note() {
        assert_eq!(validate_note(" ok ").unwrap(), " ok ");
        assert!(matches!(validate_note(""), Err(StoreError::Invalid(_))));
        assert!(matches!(validate_note(" \n\t"), Err(StoreError::Invalid(_))));
    }
}
