//! Task Rater Board server.

use std::sync::Arc;

use anyhow::Context;
use task_rater::config::{AppConfig, StoreBackend};
use task_rater::google_auth::{ServiceAccountAuth, ServiceAccountKey};
use task_rater::store::firebase::FirebaseStore;
use task_rater::store::sqlite::SqliteStore;
use task_rater::store::TaskStore;
use task_rater::{build_router, AppState};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_rater=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn TaskStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::connect(&config.sqlite_path)
                .await
                .with_context(|| format!("Failed to open SQLite store at {}", config.sqlite_path))?,
        ),
        StoreBackend::Firebase => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not set")?;
            let auth = match config.service_account_json.as_deref() {
                Some(json) => Some(ServiceAccountAuth::new(ServiceAccountKey::from_json(json)?)),
                None => {
                    warn!("No service account configured; relying on open database rules");
                    None
                }
            };
            Arc::new(FirebaseStore::new(database_url, auth).context("Invalid realtime database config")?)
        }
    };
    info!("Task store: {}", store.name());

    if !config.web.is_configured() {
        info!("Browser client config incomplete; login page uses the email form only");
    }

    let state = AppState::new(store, config.web.clone(), config.recent_task_limit);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
