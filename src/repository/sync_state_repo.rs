//! Sync Metadata Repository

use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::domain::SyncMetadata;
use crate::error::StoreResult;
use super::db::DbState;

const LAST_SYNC_KEY: &str = "last_sync";

#[derive(Clone)]
pub struct SyncStateRepository {
    db: Arc<DbState>,
}

impl SyncStateRepository {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Stored metadata, zeroed when nothing was recorded yet
    pub async fn load(&self) -> StoreResult<SyncMetadata> {
        self.db
            .with_conn(|conn| {
                let last_sync: Option<i64> = conn
                    .query_row(
                        "SELECT last_sync FROM sync_state WHERE key = ?1",
                        params![LAST_SYNC_KEY],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(SyncMetadata {
                    last_sync: last_sync.unwrap_or(0),
                })
            })
            .await
    }

    pub async fn set_last_sync(&self, timestamp_ms: i64) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO sync_state (key, last_sync) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET last_sync = excluded.last_sync",
                    params![LAST_SYNC_KEY, timestamp_ms],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM sync_state", [])?;
                Ok(())
            })
            .await
    }
}
