//! Rating task record types.
//!
//! These types are shared by the parser, both storage backends and the JSON
//! endpoints. Field names on the wire match the stored document layout
//! (`rating_results`, `submitted_by`, `header_info`, ...).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Turn an email into a key usable inside a voters map.
///
/// Hosted document stores reject `.` in keys, so dots become commas.
pub fn sanitize_user_key(email: &str) -> String {
    email.trim().to_lowercase().replace('.', ",")
}

/// Normalize a user identity as it arrives from a form or JSON body.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A label/value row, used for both the metadata and ratings tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: String,
}

impl LabeledValue {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Task-level header fields pulled from the top of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHeaders {
    #[serde(rename = "Task ID", default = "unknown")]
    pub task_id: String,
    #[serde(rename = "Task Type", default = "unknown")]
    pub task_type: String,
    #[serde(rename = "Viewport Age", default = "unknown")]
    pub viewport_age: String,
    #[serde(rename = "Locale", default = "unknown")]
    pub locale: String,
    #[serde(rename = "Lat, Lng", default = "unknown")]
    pub lat_lng: String,
    #[serde(rename = "Query", default = "unknown_query")]
    pub query: String,
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn unknown_query() -> String {
    "Unknown Query".to_string()
}

impl Default for TaskHeaders {
    fn default() -> Self {
        Self {
            task_id: unknown(),
            task_type: unknown(),
            viewport_age: unknown(),
            locale: unknown(),
            lat_lng: unknown(),
            query: unknown_query(),
        }
    }
}

impl TaskHeaders {
    /// Header rows in display order.
    pub fn rows(&self) -> [(&'static str, &str); 6] {
        [
            ("Task ID", self.task_id.as_str()),
            ("Task Type", self.task_type.as_str()),
            ("Viewport Age", self.viewport_age.as_str()),
            ("Locale", self.locale.as_str()),
            ("Lat, Lng", self.lat_lng.as_str()),
            ("Query", self.query.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Up,
    Down,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Up => "up",
            VoteKind::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

/// Resolve a voter's new status after pressing `requested`.
///
/// Pressing the same button twice retracts the vote.
pub fn next_vote(previous: Option<VoteKind>, requested: VoteKind) -> Option<VoteKind> {
    if previous == Some(requested) {
        None
    } else {
        Some(requested)
    }
}

/// A comment left on a single result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// One numbered result inside a submitted version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingResult {
    pub num: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub meta: Vec<LabeledValue>,
    #[serde(default)]
    pub ratings: Vec<LabeledValue>,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub downvotes: i64,
    /// Voter key → vote.
    #[serde(default)]
    pub voters: BTreeMap<String, VoteKind>,
    /// Note id → note. Ids sort in creation order.
    #[serde(default)]
    pub notes: BTreeMap<String, Note>,
}

impl RatingResult {
    /// Apply a toggle vote in place and return the voter's new status.
    pub fn toggle_vote(&mut self, voter_key: &str, requested: VoteKind) -> Option<VoteKind> {
        let previous = self.voters.get(voter_key).copied();
        match previous {
            Some(VoteKind::Up) => self.upvotes -= 1,
            Some(VoteKind::Down) => self.downvotes -= 1,
            None => {}
        }

        let next = next_vote(previous, requested);
        match next {
            Some(kind) => {
                match kind {
                    VoteKind::Up => self.upvotes += 1,
                    VoteKind::Down => self.downvotes += 1,
                }
                self.voters.insert(voter_key.to_string(), kind);
            }
            None => {
                self.voters.remove(voter_key);
            }
        }
        next
    }

    pub fn tally(&self, voter_key: &str) -> VoteTally {
        VoteTally {
            up: self.upvotes,
            down: self.downvotes,
            user_status: self.voters.get(voter_key).copied(),
        }
    }

    /// More downvotes than upvotes; rendered with a caution style.
    pub fn is_contested(&self) -> bool {
        self.downvotes > self.upvotes
    }
}

/// Vote counts after a vote, plus the caller's own status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub up: i64,
    pub down: i64,
    pub user_status: Option<VoteKind>,
}

/// Structured output of one pasted export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTask {
    pub task_id: String,
    pub query: String,
    pub headers: TaskHeaders,
    pub results: Vec<RatingResult>,
}

impl ParsedTask {
    /// SHA-256 over the extracted content of the results.
    ///
    /// Votes and notes are excluded so the fingerprint only depends on what
    /// was pasted.
    pub fn results_fingerprint(&self) -> String {
        results_fingerprint(&self.results)
    }
}

pub fn results_fingerprint(results: &[RatingResult]) -> String {
    #[derive(Serialize)]
    struct Extracted<'a> {
        num: &'a str,
        title: &'a str,
        subtitle: &'a str,
        meta: &'a [LabeledValue],
        ratings: &'a [LabeledValue],
    }

    let extracted: Vec<Extracted<'_>> = results
        .iter()
        .map(|r| Extracted {
            num: &r.num,
            title: &r.title,
            subtitle: &r.subtitle,
            meta: &r.meta,
            ratings: &r.ratings,
        })
        .collect();

    let mut hasher = Sha256::new();
    // Serializing plain strings and vectors cannot fail.
    hasher.update(serde_json::to_vec(&extracted).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// One stored submission of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskVersion {
    pub db_id: String,
    pub results: Vec<RatingResult>,
    pub author: String,
    pub timestamp: i64,
}

/// All stored versions of a task, as shown on the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskGroup {
    pub task_id: String,
    pub headers: TaskHeaders,
    pub query: String,
    pub versions: Vec<TaskVersion>,
}

impl TaskGroup {
    /// Case-insensitive substring match on task id or query.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.task_id.to_lowercase().contains(needle_lower)
            || self.query.to_lowercase().contains(needle_lower)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version_id: String },
    /// An existing version already holds identical results.
    Duplicate { version_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RatingResult {
        RatingResult {
            num: "1".to_string(),
            title: "Joe's Pizza".to_string(),
            subtitle: String::new(),
            meta: Vec::new(),
            ratings: vec![LabeledValue::new("Relevance", "Excellent")],
            upvotes: 0,
            downvotes: 0,
            voters: BTreeMap::new(),
            notes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_sanitize_user_key() {
        assert_eq!(sanitize_user_key(" Jane.Doe@Example.com "), "jane,doe@example,com");
    }

    #[test]
    fn test_toggle_vote_add_and_retract() {
        let mut r = result();
        assert_eq!(r.toggle_vote("a", VoteKind::Up), Some(VoteKind::Up));
        assert_eq!((r.upvotes, r.downvotes), (1, 0));

        assert_eq!(r.toggle_vote("a", VoteKind::Up), None);
        assert_eq!((r.upvotes, r.downvotes), (0, 0));
        assert!(r.voters.is_empty());
    }

    #[test]
    fn test_toggle_vote_switch_side() {
        let mut r = result();
        r.toggle_vote("a", VoteKind::Up);
        r.toggle_vote("b", VoteKind::Up);
        assert_eq!(r.toggle_vote("a", VoteKind::Down), Some(VoteKind::Down));
        assert_eq!((r.upvotes, r.downvotes), (1, 1));

        let tally = r.tally("a");
        assert_eq!(tally.user_status, Some(VoteKind::Down));
        r.toggle_vote("b", VoteKind::Down);
        assert!(r.is_contested());
    }

    #[test]
    fn test_fingerprint_ignores_votes_and_notes() {
        let a = result();
        let mut b = result();
        b.toggle_vote("x", VoteKind::Down);
        b.notes.insert(
            "n1".to_string(),
            Note { user: "x@y.z".to_string(), text: "hm".to_string(), timestamp: 1 },
        );
        assert_eq!(results_fingerprint(&[a.clone()]), results_fingerprint(&[b]));

        let mut c = a.clone();
        c.ratings[0].value = "Good".to_string();
        assert_ne!(results_fingerprint(&[a]), results_fingerprint(&[c]));
    }

    #[test]
    fn test_headers_deserialize_with_missing_fields() {
        let h: TaskHeaders = serde_json::from_str(r#"{"Task ID": "t1"}"#).unwrap();
        assert_eq!(h.task_id, "t1");
        assert_eq!(h.locale, "Unknown");
        assert_eq!(h.query, "Unknown Query");
    }
}
