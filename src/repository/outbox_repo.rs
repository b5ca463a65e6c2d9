//! Outbox Repository Implementation
//!
//! Durable FIFO of pending mutations. Order is the autoincrement `seq`
//! assigned at enqueue time; updating an entry in place keeps its position.

use rusqlite::{params, Row};
use std::sync::Arc;

use crate::domain::{OutboxAction, OutboxEntry};
use crate::error::{StoreError, StoreResult};
use super::db::DbState;

#[derive(Clone)]
pub struct OutboxRepository {
    db: Arc<DbState>,
}

impl OutboxRepository {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Append an entry at the tail of the queue
    pub async fn enqueue(&self, entry: &OutboxEntry) -> StoreResult<()> {
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                table: "outbox",
                message: e.to_string(),
            })?;

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO outbox (id, action, task_id, payload, timestamp, retries)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.id,
                        entry.action.as_str(),
                        entry.task_id,
                        payload,
                        entry.timestamp,
                        entry.retries
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// All entries in enqueue order
    pub async fn list(&self) -> StoreResult<Vec<OutboxEntry>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, action, task_id, payload, timestamp, retries FROM outbox ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map([], raw_entry)?;

                let mut entries = Vec::new();
                for raw in rows {
                    entries.push(raw?.into_entry()?);
                }
                Ok(entries)
            })
            .await
    }

    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await
    }

    /// Record one more failed delivery attempt without moving the entry
    pub async fn increment_retries(&self, id: &str) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE outbox SET retries = retries + 1 WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.db
            .with_conn(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM outbox", [])?;
                Ok(())
            })
            .await
    }
}

/// Row as stored, before decoding the action and payload
struct RawEntry {
    id: String,
    action: String,
    task_id: String,
    payload: Option<String>,
    timestamp: i64,
    retries: u32,
}

fn raw_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        task_id: row.get(2)?,
        payload: row.get(3)?,
        timestamp: row.get(4)?,
        retries: row.get(5)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> StoreResult<OutboxEntry> {
        let action = OutboxAction::parse(&self.action).ok_or_else(|| StoreError::Corrupt {
            table: "outbox",
            message: format!("unknown action '{}'", self.action),
        })?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                table: "outbox",
                message: e.to_string(),
            })?;

        Ok(OutboxEntry {
            id: self.id,
            action,
            task_id: self.task_id,
            payload,
            timestamp: self.timestamp,
            retries: self.retries,
        })
    }
}
