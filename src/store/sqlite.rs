//! Local relational task store backed by SQLite.
//!
//! One row per version, one row per result, with votes and notes in their
//! own tables. Vote counts are derived from the votes table on read, so
//! they can never drift from the recorded voters.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{key_order, validate_note, ResultRef, StoreError, StoreResult, TaskStore};
use crate::schema::{
    next_vote, now_millis, sanitize_user_key, LabeledValue, Note, ParsedTask, RatingResult,
    SaveOutcome, TaskGroup, TaskHeaders, TaskVersion, VoteKind, VoteTally,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS task_versions (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        query TEXT NOT NULL,
        header_info TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        submitted_by TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_task_versions_task ON task_versions(task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS rating_results (
        version_id TEXT NOT NULL REFERENCES task_versions(id) ON DELETE CASCADE,
        idx INTEGER NOT NULL,
        num TEXT NOT NULL,
        title TEXT NOT NULL,
        subtitle TEXT NOT NULL,
        meta TEXT NOT NULL,
        ratings TEXT NOT NULL,
        PRIMARY KEY (version_id, idx)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        version_id TEXT NOT NULL,
        idx INTEGER NOT NULL,
        voter TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('up', 'down')),
        PRIMARY KEY (version_id, idx, voter),
        FOREIGN KEY (version_id, idx) REFERENCES rating_results(version_id, idx) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        version_id TEXT NOT NULL,
        idx INTEGER NOT NULL,
        user TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (version_id, idx) REFERENCES rating_results(version_id, idx) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notes_result ON notes(version_id, idx)",
];

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    id: String,
    query: String,
    header_info: String,
    submitted_by: String,
    created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    idx: i64,
    num: String,
    title: String,
    subtitle: String,
    meta: String,
    ratings: String,
}

#[derive(Debug, sqlx::FromRow)]
struct VoteRow {
    idx: i64,
    voter: String,
    kind: String,
}

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    id: String,
    idx: i64,
    user: String,
    text: String,
    created_at: i64,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file and apply the schema.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        info!("Connected to SQLite task store at {}", path);
        Self::from_pool(pool).await
    }

    /// Private in-memory database; one connection so every query sees it.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(Self { pool })
    }

    /// Every mutation reads before it writes. Taking the write lock at
    /// `BEGIN` makes concurrent writers wait on the busy timeout instead of
    /// failing when a deferred read lock cannot be upgraded.
    async fn begin_write(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn load_group(&self, task_id: &str) -> StoreResult<Option<TaskGroup>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            r#"
            SELECT id, query, header_info, submitted_by, created_at
            FROM task_versions
            WHERE task_id = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        let Some(latest) = rows.last() else {
            return Ok(None);
        };
        let headers: TaskHeaders = serde_json::from_str(&latest.header_info)?;
        let query = latest.query.clone();

        let mut versions = Vec::with_capacity(rows.len());
        for row in &rows {
            versions.push(TaskVersion {
                db_id: row.id.clone(),
                results: self.load_results(&row.id).await?,
                author: row.submitted_by.clone(),
                timestamp: row.created_at,
            });
        }

        Ok(Some(TaskGroup {
            task_id: task_id.to_string(),
            headers,
            query,
            versions,
        }))
    }

    async fn load_results(&self, version_id: &str) -> StoreResult<Vec<RatingResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT idx, num, title, subtitle, meta, ratings
            FROM rating_results
            WHERE version_id = ?
            ORDER BY idx
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        let votes: Vec<VoteRow> =
            sqlx::query_as("SELECT idx, voter, kind FROM votes WHERE version_id = ?")
                .bind(version_id)
                .fetch_all(&self.pool)
                .await?;

        let notes: Vec<NoteRow> = sqlx::query_as(
            "SELECT id, idx, user, text, created_at FROM notes WHERE version_id = ? ORDER BY id",
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let mut result = RatingResult {
                num: row.num,
                title: row.title,
                subtitle: row.subtitle,
                meta: serde_json::from_str(&row.meta)?,
                ratings: serde_json::from_str(&row.ratings)?,
                upvotes: 0,
                downvotes: 0,
                voters: BTreeMap::new(),
                notes: BTreeMap::new(),
            };

            for vote in votes.iter().filter(|v| v.idx == row.idx) {
                let Some(kind) = VoteKind::parse(&vote.kind) else {
                    continue;
                };
                match kind {
                    VoteKind::Up => result.upvotes += 1,
                    VoteKind::Down => result.downvotes += 1,
                }
                result.voters.insert(vote.voter.clone(), kind);
            }

            for note in notes.iter().filter(|n| n.idx == row.idx) {
                result.notes.insert(
                    note.id.clone(),
                    Note {
                        user: note.user.clone(),
                        text: note.text.clone(),
                        timestamp: note.created_at,
                    },
                );
            }

            results.push(result);
        }
        Ok(results)
    }

    /// Check that the result exists and belongs to the task; return the
    /// version's author.
    async fn require_result(
        tx: &mut Transaction<'_, Sqlite>,
        target: &ResultRef,
    ) -> StoreResult<String> {
        let author: Option<String> = sqlx::query_scalar(
            r#"
            SELECT v.submitted_by
            FROM rating_results r
            JOIN task_versions v ON v.id = r.version_id
            WHERE r.version_id = ? AND r.idx = ? AND v.task_id = ?
            "#,
        )
        .bind(&target.version_id)
        .bind(target.idx as i64)
        .bind(&target.task_id)
        .fetch_optional(&mut **tx)
        .await?;

        author.ok_or_else(|| StoreError::NotFound(format!("result {}", target)))
    }
}

#[async_trait::async_trait]
impl TaskStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_version(
        &self,
        parsed: &ParsedTask,
        submitted_by: &str,
    ) -> StoreResult<SaveOutcome> {
        let fingerprint = parsed.results_fingerprint();
        let mut tx = self.begin_write().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM task_versions WHERE task_id = ? AND fingerprint = ? LIMIT 1",
        )
        .bind(&parsed.task_id)
        .bind(&fingerprint)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(version_id) = existing {
            debug!("Task {} already has identical version {}", parsed.task_id, version_id);
            return Ok(SaveOutcome::Duplicate { version_id });
        }

        let version_id = Uuid::now_v7().to_string();
        sqlx::query(
            r#"
            INSERT INTO task_versions (id, task_id, query, header_info, fingerprint, submitted_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version_id)
        .bind(&parsed.task_id)
        .bind(&parsed.query)
        .bind(serde_json::to_string(&parsed.headers)?)
        .bind(&fingerprint)
        .bind(submitted_by)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        for (idx, result) in parsed.results.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO rating_results (version_id, idx, num, title, subtitle, meta, ratings)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&version_id)
            .bind(idx as i64)
            .bind(&result.num)
            .bind(&result.title)
            .bind(&result.subtitle)
            .bind(serde_json::to_string(&result.meta)?)
            .bind(serde_json::to_string(&result.ratings)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "Saved version {} of task {} ({} results) by {}",
            version_id,
            parsed.task_id,
            parsed.results.len(),
            submitted_by
        );
        Ok(SaveOutcome::Saved { version_id })
    }

    async fn recent_tasks(&self, limit: usize) -> StoreResult<Vec<TaskGroup>> {
        let mut task_ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT task_id FROM task_versions")
                .fetch_all(&self.pool)
                .await?;
        task_ids.sort_by(|a, b| key_order(b, a));
        task_ids.truncate(limit);

        let mut groups = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            if let Some(group) = self.load_group(&task_id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn task(&self, task_id: &str) -> StoreResult<Option<TaskGroup>> {
        self.load_group(task_id).await
    }

    async fn edit_ratings(
        &self,
        target: &ResultRef,
        new_ratings: &[LabeledValue],
        user: &str,
    ) -> StoreResult<()> {
        let mut tx = self.begin_write().await?;
        let author = Self::require_result(&mut tx, target).await?;
        if author != user {
            return Err(StoreError::Unauthorized(
                "Only the author can edit this version".to_string(),
            ));
        }

        sqlx::query("UPDATE rating_results SET ratings = ? WHERE version_id = ? AND idx = ?")
            .bind(serde_json::to_string(new_ratings)?)
            .bind(&target.version_id)
            .bind(target.idx as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Ratings of {} edited by {}", target, user);
        Ok(())
    }

    async fn add_note(&self, target: &ResultRef, user: &str, text: &str) -> StoreResult<String> {
        let text = validate_note(text)?;
        let mut tx = self.begin_write().await?;
        Self::require_result(&mut tx, target).await?;

        let note_id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO notes (id, version_id, idx, user, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&note_id)
        .bind(&target.version_id)
        .bind(target.idx as i64)
        .bind(user)
        .bind(text)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Note {} added to {} by {}", note_id, target, user);
        Ok(note_id)
    }

    async fn delete_note(&self, target: &ResultRef, note_id: &str, user: &str) -> StoreResult<()> {
        let mut tx = self.begin_write().await?;
        Self::require_result(&mut tx, target).await?;

        let owner: Option<String> =
            sqlx::query_scalar("SELECT user FROM notes WHERE id = ? AND version_id = ? AND idx = ?")
                .bind(note_id)
                .bind(&target.version_id)
                .bind(target.idx as i64)
                .fetch_optional(&mut *tx)
                .await?;

        match owner {
            Some(owner) if owner == user => {}
            _ => {
                return Err(StoreError::Unauthorized(
                    "You can only delete your own notes.".to_string(),
                ))
            }
        }

        sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(note_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Note {} deleted from {} by {}", note_id, target, user);
        Ok(())
    }

    async fn vote(&self, target: &ResultRef, user: &str, kind: VoteKind) -> StoreResult<VoteTally> {
        let voter = sanitize_user_key(user);
        let mut tx = self.begin_write().await?;
        Self::require_result(&mut tx, target).await?;

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT kind FROM votes WHERE version_id = ? AND idx = ? AND voter = ?",
        )
        .bind(&target.version_id)
        .bind(target.idx as i64)
        .bind(&voter)
        .fetch_optional(&mut *tx)
        .await?;

        let next = next_vote(previous.as_deref().and_then(VoteKind::parse), kind);
        match next {
            Some(next) => {
                sqlx::query(
                    r#"
                    INSERT INTO votes (version_id, idx, voter, kind) VALUES (?, ?, ?, ?)
                    ON CONFLICT (version_id, idx, voter) DO UPDATE SET kind = excluded.kind
                    "#,
                )
                .bind(&target.version_id)
                .bind(target.idx as i64)
                .bind(&voter)
                .bind(next.as_str())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM votes WHERE version_id = ? AND idx = ? AND voter = ?")
                    .bind(&target.version_id)
                    .bind(target.idx as i64)
                    .bind(&voter)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let (up, down): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN kind = 'up' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN kind = 'down' THEN 1 ELSE 0 END), 0)
            FROM votes
            WHERE version_id = ? AND idx = ?
            "#,
        )
        .bind(&target.version_id)
        .bind(target.idx as i64)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Vote on {} by {}: {:?}", target, voter, next);
        Ok(VoteTally {
            up,
            down,
            user_status: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::process_text;

    const EXPORT: &str = "Task ID\nT-100\nQuery\n\ncoffee\n\n1.\nBlue Bottle\nRelevance\nGood\n\n2.\nStumptown\nRelevance\nAcceptable\n";

    async fn store_with_version() -> (SqliteStore, String) {
        let store = SqliteStore::in_memory().await.unwrap();
        let parsed = process_text(EXPORT);
        let outcome = store.save_version(&parsed, "ann@example.com").await.unwrap();
        let SaveOutcome::Saved { version_id } = outcome else {
            panic!("expected a fresh save");
        };
        (store, version_id)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, version_id) = store_with_version().await;
        let group = store.task("T-100").await.unwrap().unwrap();
        assert_eq!(group.query, "coffee");
        assert_eq!(group.headers.task_id, "T-100");
        assert_eq!(group.versions.len(), 1);
        assert_eq!(group.versions[0].db_id, version_id);
        assert_eq!(group.versions[0].author, "ann@example.com");
        assert_eq!(group.versions[0].results.len(), 2);
        assert_eq!(group.versions[0].results[1].title, "Stumptown");
    }

    #[tokio::test]
    async fn test_duplicate_submission_not_stored() {
        let (store, version_id) = store_with_version().await;
        let parsed = process_text(EXPORT);
        let outcome = store.save_version(&parsed, "bob@example.com").await.unwrap();
        assert_eq!(outcome, SaveOutcome::Duplicate { version_id });

        let changed = process_text(&EXPORT.replace("Acceptable", "Bad"));
        let outcome = store.save_version(&changed, "bob@example.com").await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
        let group = store.task("T-100").await.unwrap().unwrap();
        assert_eq!(group.versions.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_tasks_newest_key_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        for id in ["A-1", "C-3", "B-2"] {
            let parsed = process_text(&EXPORT.replace("T-100", id));
            store.save_version(&parsed, "ann@example.com").await.unwrap();
        }
        let groups = store.recent_tasks(2).await.unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.task_id.as_str()).collect();
        assert_eq!(ids, vec!["C-3", "B-2"]);
    }

    #[tokio::test]
    async fn test_recent_tasks_integer_keys_sort_numerically() {
        let store = SqliteStore::in_memory().await.unwrap();
        for id in ["9", "10", "X-1", "2"] {
            let parsed = process_text(&EXPORT.replace("T-100", id));
            store.save_version(&parsed, "ann@example.com").await.unwrap();
        }
        let groups = store.recent_tasks(3).await.unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.task_id.as_str()).collect();
        assert_eq!(ids, vec!["X-1", "10", "9"]);
    }

    #[tokio::test]
    async fn test_vote_toggle() {
        let (store, version_id) = store_with_version().await;
        let target = ResultRef::new("T-100", &version_id, 0);

        let t = store.vote(&target, "ann@example.com", VoteKind::Up).await.unwrap();
        assert_eq!((t.up, t.down, t.user_status), (1, 0, Some(VoteKind::Up)));

        let t = store.vote(&target, "bob@example.com", VoteKind::Down).await.unwrap();
        assert_eq!((t.up, t.down), (1, 1));

        let t = store.vote(&target, "ann@example.com", VoteKind::Down).await.unwrap();
        assert_eq!((t.up, t.down, t.user_status), (0, 2, Some(VoteKind::Down)));

        let t = store.vote(&target, "ann@example.com", VoteKind::Down).await.unwrap();
        assert_eq!((t.up, t.down, t.user_status), (0, 1, None));

        let group = store.task("T-100").await.unwrap().unwrap();
        let result = &group.versions[0].results[0];
        assert_eq!(result.downvotes, 1);
        assert_eq!(result.voters.get("bob@example,com"), Some(&VoteKind::Down));
    }

    #[tokio::test]
    async fn test_vote_on_missing_result() {
        let (store, version_id) = store_with_version().await;
        let err = store
            .vote(&ResultRef::new("T-100", &version_id, 9), "ann@example.com", VoteKind::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store
            .vote(&ResultRef::new("OTHER", &version_id, 0), "ann@example.com", VoteKind::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_edit_ratings_author_only() {
        let (store, version_id) = store_with_version().await;
        let target = ResultRef::new("T-100", &version_id, 1);
        let ratings = vec![LabeledValue::new("Relevance", "Excellent")];

        let err = store
            .edit_ratings(&target, &ratings, "bob@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        store.edit_ratings(&target, &ratings, "ann@example.com").await.unwrap();
        let group = store.task("T-100").await.unwrap().unwrap();
        assert_eq!(group.versions[0].results[1].ratings, ratings);
    }

    #[tokio::test]
    async fn test_notes_lifecycle() {
        let (store, version_id) = store_with_version().await;
        let target = ResultRef::new("T-100", &version_id, 0);

        assert!(matches!(
            store.add_note(&target, "bob@example.com", "   ").await,
            Err(StoreError::Invalid(_))
        ));

        let note_id = store
            .add_note(&target, "bob@example.com", "pin looks off")
            .await
            .unwrap();

        let err = store
            .delete_note(&target, &note_id, "ann@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let group = store.task("T-100").await.unwrap().unwrap();
        let note = &group.versions[0].results[0].notes[&note_id];
        assert_eq!(note.user, "bob@example.com");
        assert_eq!(note.text, "pin looks off");

        store.delete_note(&target, &note_id, "bob@example.com").await.unwrap();
        let group = store.task("T-100").await.unwrap().unwrap();
        assert!(group.versions[0].results[0].notes.is_empty());
    }

    /// Database file in the temp dir, removed (with its WAL files) on drop.
    struct TempDb(std::path::PathBuf);

    impl TempDb {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("task-rater-{}.db", Uuid::now_v7())))
        }

        fn path(&self) -> String {
            self.0.display().to_string()
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.path(), suffix));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_on_file_store() {
        let db = TempDb::new();
        let store = SqliteStore::connect(&db.path()).await.unwrap();
        let outcome = store.save_version(&process_text(EXPORT), "ann@example.com").await.unwrap();
        let SaveOutcome::Saved { version_id } = outcome else {
            panic!("expected a fresh save");
        };
        let target = ResultRef::new("T-100", &version_id, 0);

        let handles: Vec<_> = (0..30)
            .map(|i| {
                let store = store.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    store.vote(&target, &format!("u{}@example.com", i), VoteKind::Up).await
                })
            })
            .collect();

        for handle in handles {
            let tally = handle.await.unwrap().expect("concurrent vote should succeed");
            assert_eq!(tally.user_status, Some(VoteKind::Up));
        }

        let group = store.task("T-100").await.unwrap().unwrap();
        let result = &group.versions[0].results[0];
        assert_eq!(result.upvotes, 30);
        assert_eq!(result.voters.len(), 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_saves_store_one_version() {
        let db = TempDb::new();
        let store = SqliteStore::connect(&db.path()).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save_version(&process_text(EXPORT), &format!("u{}@example.com", i))
                        .await
                })
            })
            .collect();

        let mut saved = 0;
        for handle in handles {
            match handle.await.unwrap().expect("concurrent save should succeed") {
                SaveOutcome::Saved { .. } => saved += 1,
                SaveOutcome::Duplicate { .. } => {}
            }
        }
        assert_eq!(saved, 1);

        let group = store.task("T-100").await.unwrap().unwrap();
        assert_eq!(group.versions.len(), 1);
    }
}
