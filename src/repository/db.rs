//! Database Connection and Setup
//!
//! Owns the SQLite connection and runs migrations on open.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Database state wrapper
///
/// The connection is `None` until [`DbState::open`] succeeds and again after
/// [`DbState::close`]; every query in between fails with
/// [`StoreError::StorageUnavailable`]. rusqlite is synchronous, so the lock
/// is a plain mutex that is never held across an await.
pub struct DbState {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl DbState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the connection if needed and bring the schema up to date.
    /// Safe to call on every startup.
    pub async fn open(&self) -> StoreResult<()> {
        let mut guard = self.lock()?;
        if guard.is_some() {
            return Ok(());
        }

        let conn = Connection::open(&self.path)?;
        run_migrations(&conn)?;
        info!(path = %self.path.display(), "local database opened");
        *guard = Some(conn);
        Ok(())
    }

    pub async fn close(&self) {
        if let Ok(mut guard) = self.lock() {
            if guard.take().is_some() {
                debug!(path = %self.path.display(), "local database closed");
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Run `f` against the open connection
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send,
        T: Send,
    {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::StorageUnavailable("Database not initialized".to_string()))?;
        f(conn)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::StorageUnavailable("Database lock poisoned".to_string()))
    }
}

/// Open a database at `db_path`
pub async fn init_db(db_path: &Path) -> StoreResult<DbState> {
    let state = DbState::new(db_path);
    state.open().await?;
    Ok(state)
}

fn schema_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let version = schema_version(conn)?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    // Version 1: the four tables plus the task indexes
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            completed INTEGER NOT NULL DEFAULT 0,
            modified_at TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed);
        CREATE INDEX IF NOT EXISTS idx_tasks_modified ON tasks(modified_at);

        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS outbox (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            action TEXT NOT NULL,
            task_id TEXT NOT NULL,
            payload TEXT,
            timestamp INTEGER NOT NULL,
            retries INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            last_sync INTEGER NOT NULL
        );",
    )?;

    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    debug!(from = version, to = SCHEMA_VERSION, "schema migrated");
    Ok(())
}
