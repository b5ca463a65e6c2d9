//! Repository Layer
//!
//! Durable store: four SQLite tables (tasks, tags, outbox, sync_state) behind
//! one shared connection.

mod db;
mod outbox_repo;
mod sync_state_repo;
mod tag_repo;
mod task_repo;
mod traits;

#[cfg(test)]
mod tests;

pub use db::{init_db, DbState, SCHEMA_VERSION};
pub use outbox_repo::OutboxRepository;
pub use sync_state_repo::SyncStateRepository;
pub use tag_repo::TagRepository;
pub use task_repo::TaskRepository;
pub use traits::Repository;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StoreResult;

/// All tables of the local database
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<DbState>,
    pub tasks: TaskRepository,
    pub tags: TagRepository,
    pub outbox: OutboxRepository,
    pub sync_state: SyncStateRepository,
}

impl LocalStore {
    /// Store backed by the file at `path`; nothing is opened yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let db = Arc::new(DbState::new(path));
        Self {
            tasks: TaskRepository::new(db.clone()),
            tags: TagRepository::new(db.clone()),
            outbox: OutboxRepository::new(db.clone()),
            sync_state: SyncStateRepository::new(db.clone()),
            db,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub async fn open(&self) -> StoreResult<()> {
        self.db.open().await
    }

    pub async fn close(&self) {
        self.db.close().await
    }

    pub async fn is_open(&self) -> bool {
        self.db.is_open().await
    }

    /// Empty every table in one transaction
    pub async fn clear_all(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute_batch(
                    "DELETE FROM tasks;
                     DELETE FROM tags;
                     DELETE FROM outbox;
                     DELETE FROM sync_state;",
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}
