//! Task Repository Implementation
//!
//! SQLite-backed implementation of Repository<Task>. Tasks are stored as JSON
//! with `completed` and `modified_at` copied into indexed columns.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::domain::Task;
use crate::error::{StoreError, StoreResult};
use super::db::DbState;
use super::traits::Repository;

/// SQLite implementation of Task repository
#[derive(Clone)]
pub struct TaskRepository {
    db: Arc<DbState>,
}

impl TaskRepository {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Equality lookup on the completion index
    pub async fn list_by_completed(&self, completed: bool) -> StoreResult<Vec<Task>> {
        self.db
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT data FROM tasks WHERE completed = ?1 ORDER BY rowid")?;
                let rows = stmt.query_map(params![completed], |row| row.get::<_, String>(0))?;

                let mut tasks = Vec::new();
                for data in rows {
                    tasks.push(row_to_task(&data?)?);
                }
                Ok(tasks)
            })
            .await
    }
}

#[async_trait]
impl Repository<Task> for TaskRepository {
    async fn get(&self, key: &str) -> StoreResult<Option<Task>> {
        self.db
            .with_conn(|conn| {
                let data: Option<String> = conn
                    .query_row("SELECT data FROM tasks WHERE id = ?1", params![key], |row| row.get(0))
                    .optional()?;
                data.map(|d| row_to_task(&d)).transpose()
            })
            .await
    }

    async fn get_all(&self) -> StoreResult<Vec<Task>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT data FROM tasks ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

                let mut tasks = Vec::new();
                for data in rows {
                    tasks.push(row_to_task(&data?)?);
                }
                Ok(tasks)
            })
            .await
    }

    async fn put(&self, entity: &Task) -> StoreResult<()> {
        self.db.with_conn(|conn| upsert(conn, entity)).await
    }

    async fn put_all(&self, entities: &[Task]) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                for task in entities {
                    upsert(&tx, task)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn replace_all(&self, entities: &[Task]) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM tasks", [])?;
                for task in entities {
                    upsert(&tx, task)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![key])?;
                Ok(())
            })
            .await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM tasks", [])?;
                Ok(())
            })
            .await
    }
}

fn upsert(conn: &Connection, task: &Task) -> StoreResult<()> {
    let data = serde_json::to_string(task).map_err(|e| StoreError::Corrupt {
        table: "tasks",
        message: e.to_string(),
    })?;

    conn.execute(
        "INSERT INTO tasks (id, completed, modified_at, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            completed = excluded.completed,
            modified_at = excluded.modified_at,
            data = excluded.data",
        params![task.id, task.completed, task.modified_at, data],
    )?;
    Ok(())
}

/// Convert a stored row to Task
fn row_to_task(data: &str) -> StoreResult<Task> {
    serde_json::from_str(data).map_err(|e| StoreError::Corrupt {
        table: "tasks",
        message: e.to_string(),
    })
}
