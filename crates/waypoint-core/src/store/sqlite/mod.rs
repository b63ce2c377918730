//! SQLite-backed session and result stores.
//!
//! [`Database`] wraps a synchronous `rusqlite` connection and carries the
//! queries, split by table into `plan_queries`, `result_queries` and
//! `history_queries`. The async stores open a connection per call inside
//! `spawn_blocking`, so the runtime's worker threads never block on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tokio::task;

use super::{ResultStore, SessionStore};
use crate::error::{DatabaseResultExt, EngineError, Result};
use crate::models::{Plan, ResultRef, Turn};

pub mod history_queries;
pub mod migrations;
pub mod plan_queries;
pub mod result_queries;

/// Database connection and operations handler.
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Opens the database and initializes the schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Connection::open(path).db_context("Failed to open database connection")?;

        let db = Self { connection };
        db.initialize_schema()?;
        Ok(db)
    }
}

/// Creates the parent directory and initializes the schema once.
async fn prepare(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::FileSystem {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let db_path = db_path.to_path_buf();
    run_blocking(db_path, |_| Ok(())).await
}

async fn run_blocking<T, F>(db_path: PathBuf, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
{
    task::spawn_blocking(move || {
        let mut db = Database::new(&db_path)?;
        f(&mut db)
    })
    .await
    .map_err(|e| EngineError::Configuration {
        message: format!("Task join error: {e}"),
    })?
}

/// Plans and history in a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::FileSystem` if the parent directory cannot be
    /// created, `EngineError::Database` if schema initialization fails.
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        prepare(&db_path).await?;
        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load_plan(&self, session_id: &str) -> Result<Option<Plan>> {
        let session_id = session_id.to_string();
        run_blocking(self.db_path.clone(), move |db| db.load_plan(&session_id)).await
    }

    async fn save_plan(&self, plan: &mut Plan) -> Result<()> {
        let snapshot = plan.clone();
        let version = run_blocking(self.db_path.clone(), move |db| db.save_plan(&snapshot)).await?;
        plan.version = version;
        Ok(())
    }

    async fn append_history(&self, turn: &Turn) -> Result<()> {
        let turn = turn.clone();
        run_blocking(self.db_path.clone(), move |db| db.insert_turn(&turn)).await
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        let session_id = session_id.to_string();
        run_blocking(self.db_path.clone(), move |db| db.get_turns(&session_id)).await
    }
}

/// Step payloads in a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    db_path: PathBuf,
}

impl SqliteResultStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        prepare(&db_path).await?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn put(&self, payload: Value) -> Result<ResultRef> {
        run_blocking(self.db_path.clone(), move |db| db.insert_result(&payload)).await
    }

    async fn get(&self, reference: &ResultRef) -> Result<Value> {
        let reference = reference.clone();
        run_blocking(self.db_path.clone(), move |db| db.get_result(&reference)).await
    }
}
