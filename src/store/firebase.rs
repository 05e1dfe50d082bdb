//! Hosted realtime database client for the task store.
//!
//! Talks to the database's REST API. Documents live under
//! `tasks/{task_id}/{version_id}` with the results stored as an array under
//! `rating_results`, the same layout browser clients listen on.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{key_order, validate_note, ResultRef, StoreError, StoreResult, TaskStore};
use crate::google_auth::ServiceAccountAuth;
use crate::schema::{
    results_fingerprint, sanitize_user_key, LabeledValue, ParsedTask, RatingResult, SaveOutcome,
    TaskGroup, TaskHeaders, TaskVersion, VoteKind, VoteTally,
};

/// Conditional write attempts before a vote gives up.
const MAX_TRANSACTION_ATTEMPTS: usize = 10;

/// Characters the database refuses inside keys.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

#[derive(Debug, Deserialize)]
struct StoredVersion {
    #[serde(default)]
    query: String,
    #[serde(default)]
    header_info: TaskHeaders,
    #[serde(default)]
    rating_results: Vec<RatingResult>,
    #[serde(default)]
    submitted_by: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    fingerprint: Option<String>,
}

impl StoredVersion {
    fn fingerprint(&self) -> String {
        self.fingerprint
            .clone()
            .unwrap_or_else(|| results_fingerprint(&self.rating_results))
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StoredNote {
    #[serde(default)]
    user: String,
}

/// Realtime database REST client.
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: Url,
    auth: Option<Arc<ServiceAccountAuth>>,
}

impl FirebaseStore {
    /// `auth` may be `None` for databases with open rules or a local emulator.
    pub fn new(database_url: &str, auth: Option<ServiceAccountAuth>) -> StoreResult<Self> {
        let base_url = Url::parse(database_url)
            .map_err(|e| StoreError::Invalid(format!("DATABASE_URL '{}': {}", database_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Invalid(format!(
                "DATABASE_URL '{}' is not a base URL",
                database_url
            )));
        }

        if let Some(auth) = &auth {
            info!("Realtime database auth via {}", auth.client_email());
        } else {
            warn!("Realtime database used without credentials");
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            auth: auth.map(Arc::new),
        })
    }

    /// Build `{base}/{segments...}.json`, percent-encoding every segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            if let Some((last, rest)) = segments.split_last() {
                path.extend(rest);
                path.push(&format!("{}.json", last));
            }
        }
        url
    }

    async fn request(&self, method: Method, url: Url) -> StoreResult<RequestBuilder> {
        let builder = self.client.request(method, url);
        match &self.auth {
            Some(auth) => {
                let token = auth
                    .access_token(&self.client)
                    .await
                    .map_err(|e| StoreError::Remote(format!("{:#}", e)))?;
                Ok(builder.bearer_auth(token))
            }
            None => Ok(builder),
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> StoreResult<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(StoreError::Remote(format!("{} failed: {} - {}", what, status, text)))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> StoreResult<Option<T>> {
        let url = self.url(segments);
        let resp = self.request(Method::GET, url).await?.send().await?;
        let resp = Self::check(resp, &format!("GET {}", segments.join("/"))).await?;
        // Absent paths come back as `null`.
        Ok(resp.json::<Option<T>>().await?)
    }

    async fn write_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> StoreResult<reqwest::Response> {
        let url = self.url(segments);
        let what = format!("{} {}", method, segments.join("/"));
        let resp = self.request(method, url).await?.json(body).send().await?;
        Self::check(resp, &what).await
    }

    async fn require_result(&self, target: &ResultRef) -> StoreResult<()> {
        let idx = target.idx.to_string();
        let num: Option<String> = self
            .get_json(&[
                "tasks",
                &target.task_id,
                &target.version_id,
                "rating_results",
                &idx,
                "num",
            ])
            .await?;
        num.map(|_| ()).ok_or_else(|| StoreError::NotFound(format!("result {}", target)))
    }

    fn group_from_versions(task_id: String, versions: BTreeMap<String, StoredVersion>) -> TaskGroup {
        let mut headers = TaskHeaders::default();
        let mut query = String::new();
        let mut list = Vec::with_capacity(versions.len());

        // Push ids sort in creation order.
        for (version_id, stored) in versions {
            headers = stored.header_info;
            query = stored.query;
            list.push(TaskVersion {
                db_id: version_id,
                results: stored.rating_results,
                author: stored.submitted_by,
                timestamp: stored.timestamp,
            });
        }

        TaskGroup {
            task_id,
            headers,
            query,
            versions: list,
        }
    }
}

/// Keys become path segments; the database would treat `/` as nesting.
fn validate_target(target: &ResultRef) -> StoreResult<()> {
    validate_key(&target.task_id)?;
    validate_key(&target.version_id)
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.contains(FORBIDDEN_KEY_CHARS) {
        return Err(StoreError::Invalid(format!(
            "'{}' cannot be used as a database key",
            key
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl TaskStore for FirebaseStore {
    fn name(&self) -> &str {
        "firebase"
    }

    async fn save_version(
        &self,
        parsed: &ParsedTask,
        submitted_by: &str,
    ) -> StoreResult<SaveOutcome> {
        validate_key(&parsed.task_id)?;
        let fingerprint = parsed.results_fingerprint();

        let existing: Option<BTreeMap<String, StoredVersion>> =
            self.get_json(&["tasks", &parsed.task_id]).await?;
        if let Some(versions) = existing {
            if let Some((version_id, _)) = versions.iter().find(|(_, v)| v.fingerprint() == fingerprint) {
                debug!("Task {} already has identical version {}", parsed.task_id, version_id);
                return Ok(SaveOutcome::Duplicate {
                    version_id: version_id.clone(),
                });
            }
        }

        let body = json!({
            "task_id": parsed.task_id,
            "query": parsed.query,
            "header_info": parsed.headers,
            "rating_results": parsed.results,
            "submitted_by": submitted_by,
            "fingerprint": fingerprint,
            "timestamp": {".sv": "timestamp"},
        });

        let resp = self
            .write_json(Method::POST, &["tasks", &parsed.task_id], &body)
            .await?;
        let pushed: PushResponse = resp.json().await?;

        info!(
            "Saved version {} of task {} ({} results) by {}",
            pushed.name,
            parsed.task_id,
            parsed.results.len(),
            submitted_by
        );
        Ok(SaveOutcome::Saved {
            version_id: pushed.name,
        })
    }

    async fn recent_tasks(&self, limit: usize) -> StoreResult<Vec<TaskGroup>> {
        let mut url = self.url(&["tasks"]);
        url.query_pairs_mut()
            .append_pair("orderBy", "\"$key\"")
            .append_pair("limitToLast", &limit.to_string());

        let resp = self.request(Method::GET, url).await?.send().await?;
        let resp = Self::check(resp, "GET tasks").await?;
        let tasks: Option<BTreeMap<String, BTreeMap<String, StoredVersion>>> = resp.json().await?;

        let mut tasks: Vec<_> = tasks.unwrap_or_default().into_iter().collect();
        tasks.sort_by(|(a, _), (b, _)| key_order(b, a));
        tasks.truncate(limit);
        Ok(tasks
            .into_iter()
            .map(|(task_id, versions)| Self::group_from_versions(task_id, versions))
            .collect())
    }

    async fn task(&self, task_id: &str) -> StoreResult<Option<TaskGroup>> {
        validate_key(task_id)?;
        let versions: Option<BTreeMap<String, StoredVersion>> =
            self.get_json(&["tasks", task_id]).await?;
        Ok(versions.map(|v| Self::group_from_versions(task_id.to_string(), v)))
    }

    async fn edit_ratings(
        &self,
        target: &ResultRef,
        new_ratings: &[LabeledValue],
        user: &str,
    ) -> StoreResult<()> {
        validate_target(target)?;
        let author: Option<String> = self
            .get_json(&["tasks", &target.task_id, &target.version_id, "submitted_by"])
            .await?;
        match author {
            None => return Err(StoreError::NotFound(format!("version {}", target))),
            Some(author) if author != user => {
                return Err(StoreError::Unauthorized(
                    "Only the author can edit this version".to_string(),
                ))
            }
            Some(_) => {}
        }
        self.require_result(target).await?;

        let idx = target.idx.to_string();
        self.write_json(
            Method::PUT,
            &[
                "tasks",
                &target.task_id,
                &target.version_id,
                "rating_results",
                &idx,
                "ratings",
            ],
            new_ratings,
        )
        .await?;
        debug!("Ratings of {} edited by {}", target, user);
        Ok(())
    }

    async fn add_note(&self, target: &ResultRef, user: &str, text: &str) -> StoreResult<String> {
        let text = validate_note(text)?;
        validate_target(target)?;
        self.require_result(target).await?;

        let idx = target.idx.to_string();
        let body = json!({
            "user": user,
            "text": text,
            "timestamp": {".sv": "timestamp"},
        });
        let resp = self
            .write_json(
                Method::POST,
                &[
                    "tasks",
                    &target.task_id,
                    &target.version_id,
                    "rating_results",
                    &idx,
                    "notes",
                ],
                &body,
            )
            .await?;
        let pushed: PushResponse = resp.json().await?;
        debug!("Note {} added to {} by {}", pushed.name, target, user);
        Ok(pushed.name)
    }

    async fn delete_note(&self, target: &ResultRef, note_id: &str, user: &str) -> StoreResult<()> {
        validate_target(target)?;
        validate_key(note_id)?;
        let idx = target.idx.to_string();
        let path = [
            "tasks",
            target.task_id.as_str(),
            target.version_id.as_str(),
            "rating_results",
            idx.as_str(),
            "notes",
            note_id,
        ];

        let note: Option<StoredNote> = self.get_json(&path).await?;
        match note {
            Some(note) if note.user == user => {}
            _ => {
                return Err(StoreError::Unauthorized(
                    "You can only delete your own notes.".to_string(),
                ))
            }
        }

        let resp = self.request(Method::DELETE, self.url(&path)).await?.send().await?;
        Self::check(resp, "DELETE note").await?;
        debug!("Note {} deleted from {} by {}", note_id, target, user);
        Ok(())
    }

    async fn vote(&self, target: &ResultRef, user: &str, kind: VoteKind) -> StoreResult<VoteTally> {
        validate_target(target)?;
        let voter = sanitize_user_key(user);
        let idx = target.idx.to_string();
        let path = [
            "tasks",
            target.task_id.as_str(),
            target.version_id.as_str(),
            "rating_results",
            idx.as_str(),
        ];

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let resp = self
                .request(Method::GET, self.url(&path))
                .await?
                .header("X-Firebase-ETag", "true")
                .send()
                .await?;
            let resp = Self::check(resp, "GET result").await?;
            let etag = resp
                .headers()
                .get("ETag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| StoreError::Remote("missing ETag on result read".to_string()))?;

            let Some(mut result) = resp.json::<Option<RatingResult>>().await? else {
                return Err(StoreError::NotFound(format!("result {}", target)));
            };

            result.toggle_vote(&voter, kind);

            let resp = self
                .request(Method::PUT, self.url(&path))
                .await?
                .header("if-match", etag)
                .json(&result)
                .send()
                .await?;

            if resp.status() == StatusCode::PRECONDITION_FAILED {
                debug!("Vote on {} lost a race (attempt {}), retrying", target, attempt);
                continue;
            }
            Self::check(resp, "PUT result").await?;

            debug!("Vote on {} by {}: {:?}", target, voter, result.voters.get(&voter));
            return Ok(result.tally(&voter));
        }

        Err(StoreError::Conflict(format!(
            "vote on {} kept conflicting after {} attempts",
            target, MAX_TRANSACTION_ATTEMPTS
        )))
    }
}
