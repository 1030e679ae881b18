//! SQLite-backed store over a `sqlx` connection pool.

mod events;
mod experiments;
mod users;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use pulse_core::config::DatabaseConfig;
use pulse_core::types::Properties;
use pulse_core::{PulseError, PulseResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    event_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    variants TEXT NOT NULL,
    goal_event TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    experiment_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    variant TEXT NOT NULL,
    assigned_at TEXT NOT NULL,
    PRIMARY KEY (experiment_id, user_id),
    FOREIGN KEY (experiment_id) REFERENCES experiments(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_events_name_ts ON events(event_name, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_user_ts ON events(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_assignments_user ON assignments(user_id);
"#;

/// Store implementation shared by every request handler.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open event store at {}", path.display()))?;

        let store = Self { pool };
        store
            .initialize_schema()
            .await
            .context("Failed to initialize event store schema")?;

        info!(path = %path.display(), "Event store ready");
        Ok(store)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Database schema initialized");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn store_err(e: sqlx::Error) -> PulseError {
    PulseError::StoreUnavailable(e.to_string())
}

/// Fixed-width UTC text so lexical order matches time order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drop precision the column cannot hold, so returned values equal stored ones.
pub(crate) fn normalize_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub(crate) fn parse_ts(raw: &str) -> PulseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PulseError::StoreUnavailable(format!("corrupt timestamp '{raw}': {e}")))
}

pub(crate) fn parse_properties(raw: &str) -> PulseResult<Properties> {
    Ok(serde_json::from_str(raw)?)
}
