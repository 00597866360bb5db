// crates/db/src/lib.rs
//! Scheduler state store: scheduled tasks and download history on SQLite.
//!
//! A fixed-size connection pool serves reads; writes run in
//! `BEGIN IMMEDIATE` transactions so readers only ever see committed
//! state. Pool exhaustion falls back to an ad-hoc connection instead of
//! blocking indefinitely.

mod downloads;
mod maintenance;
mod migrations;
mod tasks;

pub use downloads::HistoryFilter;
pub use maintenance::{IntegrityReport, StoreStatistics};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const POOL_SIZE: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("malformed row: {0}")]
    MalformedRow(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// State store handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
    connect_options: SqliteConnectOptions,
    db_path: PathBuf,
}

/// A connection handed out by [`StateStore::acquire`] — pooled when one
/// was free in time, ad-hoc otherwise.
pub enum StoreConn {
    Pooled(sqlx::pool::PoolConnection<sqlx::Sqlite>),
    Direct(SqliteConnection),
}

impl Deref for StoreConn {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            StoreConn::Pooled(c) => c,
            StoreConn::Direct(c) => c,
        }
    }
}

impl DerefMut for StoreConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            StoreConn::Pooled(c) => c,
            StoreConn::Direct(c) => c,
        }
    }
}

impl StateStore {
    /// Open (or create) the store at the given path and run migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = connect_options(&format!("sqlite:{}", path.display()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options.clone())
            .await?;

        let store = Self {
            pool,
            connect_options: options,
            db_path: path.to_owned(),
        };
        store.run_migrations().await?;

        info!("state store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests. A single pooled connection keeps every
    /// query on the same private database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options.clone())
            .await?;
        let store = Self {
            pool,
            connect_options: options,
            db_path: PathBuf::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Acquire a read connection: from the pool with a bounded wait, or a
    /// fresh ad-hoc connection when the pool is exhausted.
    pub async fn acquire(&self) -> StoreResult<StoreConn> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(StoreConn::Pooled(conn)),
            Err(sqlx::Error::PoolTimedOut) => {
                warn!("connection pool exhausted, opening ad-hoc connection");
                let conn = SqliteConnection::connect_with(&self.connect_options).await?;
                Ok(StoreConn::Direct(conn))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start a write transaction (`BEGIN IMMEDIATE`). Committed on
    /// `commit()`, rolled back when dropped early.
    pub async fn begin_immediate(
        &self,
    ) -> StoreResult<sqlx::Transaction<'static, sqlx::Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1;
            if version > current_version {
                sqlx::query(migration).execute(&self.pool).await?;
                sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path of the database file; empty for in-memory stores.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("state store connections closed");
    }
}

fn connect_options(url: &str) -> StoreResult<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30))
        .pragma("temp_store", "MEMORY")
        .pragma("cache_size", "10000"))
}
