//! Runtime configuration.
//!
//! Everything comes from the environment (after `.env` is loaded by
//! `main`). Parsing goes through a lookup closure so tests can feed values
//! without touching the process environment.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::str::FromStr;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_SQLITE_PATH: &str = "tasks.db";
const DEFAULT_RECENT_TASK_LIMIT: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Firebase,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "firebase" => Ok(Self::Firebase),
            _ => bail!("Unknown STORE_BACKEND '{}' (sqlite|firebase)", s),
        }
    }
}

/// Browser-side client config, embedded in pages as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseWebConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    #[serde(rename = "databaseURL")]
    pub database_url: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

impl FirebaseWebConfig {
    /// Enough to initialize the browser SDK.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.auth_domain.is_some() && self.project_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub backend: StoreBackend,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    /// Service account key as inline JSON.
    pub service_account_json: Option<String>,
    pub recent_task_limit: usize,
    pub web: FirebaseWebConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be host:port")?;

        let service_account_json = match (
            var("FIREBASE_SERVICE_ACCOUNT"),
            var("FIREBASE_SERVICE_ACCOUNT_PATH"),
        ) {
            (Some(json), _) => Some(json),
            (None, Some(path)) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read service account file {}", path))?,
            ),
            (None, None) => None,
        };

        let database_url = var("DATABASE_URL");

        let backend = match var("STORE_BACKEND") {
            Some(name) => name.parse()?,
            None if database_url.is_some() && service_account_json.is_some() => {
                StoreBackend::Firebase
            }
            None => StoreBackend::Sqlite,
        };

        if backend == StoreBackend::Firebase && database_url.is_none() {
            bail!("STORE_BACKEND=firebase requires DATABASE_URL");
        }

        let recent_task_limit = match var("RECENT_TASK_LIMIT") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .context("RECENT_TASK_LIMIT must be a positive integer")?,
            None => DEFAULT_RECENT_TASK_LIMIT,
        };
        if recent_task_limit == 0 {
            bail!("RECENT_TASK_LIMIT must be a positive integer");
        }

        let web = FirebaseWebConfig {
            api_key: var("FIREBASE_API_KEY"),
            auth_domain: var("FIREBASE_AUTH_DOMAIN"),
            project_id: var("FIREBASE_PROJECT_ID"),
            database_url: database_url.clone(),
            storage_bucket: var("FIREBASE_STORAGE_BUCKET"),
            messaging_sender_id: var("FIREBASE_MESSAGING_SENDER_ID"),
            app_id: var("FIREBASE_APP_ID"),
        };

        Ok(Self {
            bind_addr,
            backend,
            sqlite_path: var("SQLITE_PATH").unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string()),
            database_url,
            service_account_json,
            recent_task_limit,
            web,
        })
    }
}
