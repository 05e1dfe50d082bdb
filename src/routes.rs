//! HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::{de, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{ApiJson, AppError};
use crate::pages::{HomePage, LoginPage};
use crate::parser::process_text;
use crate::schema::{normalize_email, LabeledValue, SaveOutcome, TaskGroup, VoteKind};
use crate::store::ResultRef;
use crate::AppState;

const MAIN_JS: &str = include_str!("../static/main.js");
const STYLE_CSS: &str = include_str!("../static/style.css");

pub const MSG_LOGIN_REQUIRED: &str = "⚠️ Error: You must be logged in to save tasks.";
pub const MSG_SAVED: &str = "✅ Version saved successfully!";
pub const MSG_DUPLICATE: &str = "ℹ️ An identical version of this task is already saved.";
pub const MSG_NO_RESULTS: &str = "⚠️ No numbered results found in the pasted text.";

/// Health check endpoint.
pub async fn health() -> &'static str {
    "ok"
}

pub async fn main_js() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        MAIN_JS,
    )
        .into_response()
}

pub async fn style_css() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/css"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        STYLE_CSS,
    )
        .into_response()
}

pub async fn login_page(State(state): State<AppState>) -> Html<String> {
    Html(LoginPage { web: &state.web }.render())
}

#[derive(Debug, Default, Deserialize)]
pub struct HomeQuery {
    #[serde(default)]
    u: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HomeForm {
    #[serde(default)]
    raw_text: Option<String>,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    search_query: Option<String>,
}

pub async fn home(State(state): State<AppState>, Query(query): Query<HomeQuery>) -> Html<String> {
    render_home(&state, &query, String::new(), None).await
}

/// Paste-to-save and search both post back to the home page.
pub async fn home_post(
    State(state): State<AppState>,
    Query(query): Query<HomeQuery>,
    Form(form): Form<HomeForm>,
) -> Html<String> {
    let mut message = String::new();

    if let Some(raw_text) = form.raw_text.as_deref() {
        let user_email = normalize_email(form.user_email.as_deref().unwrap_or_default());
        message = save_pasted(&state, raw_text, &user_email).await;
    }

    let search = form
        .search_query
        .as_deref()
        .map(|s| s.trim().to_lowercase());
    render_home(&state, &query, message, search).await
}

async fn save_pasted(state: &AppState, raw_text: &str, user_email: &str) -> String {
    if user_email.is_empty() {
        return MSG_LOGIN_REQUIRED.to_string();
    }

    let parsed = process_text(raw_text);
    if parsed.results.is_empty() {
        return MSG_NO_RESULTS.to_string();
    }

    match state.store.save_version(&parsed, user_email).await {
        Ok(SaveOutcome::Saved { version_id }) => {
            info!("Task {} saved as {}", parsed.task_id, version_id);
            state.live.publish(&parsed.task_id);
            MSG_SAVED.to_string()
        }
        Ok(SaveOutcome::Duplicate { .. }) => MSG_DUPLICATE.to_string(),
        Err(e) => {
            warn!("Saving task {} failed: {}", parsed.task_id, e);
            format!("Error: {}", AppError::from(e).public_message())
        }
    }
}

async fn render_home(
    state: &AppState,
    query: &HomeQuery,
    mut message: String,
    search: Option<String>,
) -> Html<String> {
    let user = normalize_email(query.u.as_deref().unwrap_or_default());

    let mut tasks = match state.store.recent_tasks(state.recent_task_limit).await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!("Loading recent tasks failed: {}", e);
            if message.is_empty() {
                message = format!("Error: {}", AppError::from(e).public_message());
            }
            Vec::new()
        }
    };

    if let Some(needle) = search.as_deref() {
        tasks.retain(|t| t.matches(needle));
    }

    Html(
        HomePage {
            user: &user,
            message: &message,
            search: search.as_deref(),
            tasks: &tasks,
            web: &state.web,
        }
        .render(),
    )
}

/// Current state of one task, for live refresh.
pub async fn task_json(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskGroup>, AppError> {
    state
        .store
        .task(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::Store(crate::store::StoreError::NotFound(task_id)))
}

pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    state.live.sse_stream()
}

fn require_user(email: &str) -> Result<String, AppError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(AppError::LoginRequired);
    }
    Ok(email)
}

/// Result indexes arrive as numbers from the page script but as strings
/// from older clients.
fn result_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Index {
        Number(usize),
        Text(String),
    }

    match Index::deserialize(deserializer)? {
        Index::Number(n) => Ok(n),
        Index::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid result index '{}'", s))),
    }
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    task_id: String,
    ver_id: String,
    #[serde(deserialize_with = "result_index")]
    idx: usize,
    new_ratings: Vec<LabeledValue>,
    #[serde(default)]
    user_email: String,
}

/// Replace a result's ratings (version author only).
pub async fn edit_result(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EditRequest>,
) -> Result<Json<Value>, AppError> {
    let user = require_user(&req.user_email)?;
    let target = ResultRef::new(req.task_id, req.ver_id, req.idx);
    state.store.edit_ratings(&target, &req.new_ratings, &user).await?;
    state.live.publish(&target.task_id);
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    task_id: String,
    ver_id: String,
    #[serde(deserialize_with = "result_index")]
    idx: usize,
    #[serde(default)]
    note_text: String,
    #[serde(default)]
    user_email: String,
}

pub async fn add_note(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AddNoteRequest>,
) -> Result<Json<Value>, AppError> {
    let user = require_user(&req.user_email)?;
    let target = ResultRef::new(req.task_id, req.ver_id, req.idx);
    let note_id = state.store.add_note(&target, &user, &req.note_text).await?;
    state.live.publish(&target.task_id);
    Ok(Json(json!({"success": true, "note_id": note_id})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteNoteRequest {
    task_id: String,
    ver_id: String,
    #[serde(deserialize_with = "result_index")]
    idx: usize,
    note_id: String,
    #[serde(default)]
    user_email: String,
}

/// Remove a note (note author only).
pub async fn delete_note(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteNoteRequest>,
) -> Result<Json<Value>, AppError> {
    let user = require_user(&req.user_email)?;
    let target = ResultRef::new(req.task_id, req.ver_id, req.idx);
    state.store.delete_note(&target, &req.note_id, &user).await?;
    state.live.publish(&target.task_id);
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    task_id: String,
    ver_id: String,
    #[serde(deserialize_with = "result_index")]
    idx: usize,
    #[serde(rename = "type")]
    vote_type: String,
    #[serde(default)]
    user_email: String,
}

pub async fn vote(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VoteRequest>,
) -> Result<Json<Value>, AppError> {
    let user = require_user(&req.user_email)?;
    let kind = VoteKind::parse(&req.vote_type)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown vote type '{}'", req.vote_type)))?;

    let target = ResultRef::new(req.task_id, req.ver_id, req.idx);
    let tally = state.store.vote(&target, &user, kind).await?;
    state.live.publish(&target.task_id);

    Ok(Json(json!({
        "success": true,
        "up": tally.up,
        "down": tally.down,
        "user_status": tally.user_status,
    })))
}
