//! Task Rater Board - paste rating-tool exports, store them as structured
//! versions and review them with votes and notes.

pub mod config;
pub mod error;
pub mod google_auth;
pub mod live;
pub mod pages;
pub mod parser;
pub mod routes;
pub mod schema;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use config::FirebaseWebConfig;
use live::LiveHub;
use store::TaskStore;

/// Pasted exports are plain text; a few MB is plenty.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub live: LiveHub,
    pub web: Arc<FirebaseWebConfig>,
    pub recent_task_limit: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn TaskStore>, web: FirebaseWebConfig, recent_task_limit: usize) -> Self {
        Self {
            store,
            live: LiveHub::new(),
            web: Arc::new(web),
            recent_task_limit,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::home).post(routes::home_post))
        .route("/login", get(routes::login_page))
        .route("/health", get(routes::health))
        .route("/edit_result", post(routes::edit_result))
        .route("/add_note", post(routes::add_note))
        .route("/delete_note", post(routes::delete_note))
        .route("/vote", post(routes::vote))
        .route("/api/tasks/:task_id", get(routes::task_json))
        .route("/events", get(routes::events))
        .route("/static/main.js", get(routes::main_js))
        .route("/static/style.css", get(routes::style_css))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
