//! Tag Repository Implementation

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::domain::Tag;
use crate::error::{StoreError, StoreResult};
use super::db::DbState;
use super::traits::Repository;

/// SQLite implementation of Tag repository
#[derive(Clone)]
pub struct TagRepository {
    db: Arc<DbState>,
}

impl TagRepository {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Repository<Tag> for TagRepository {
    async fn get(&self, key: &str) -> StoreResult<Option<Tag>> {
        self.db
            .with_conn(|conn| {
                let data: Option<String> = conn
                    .query_row("SELECT data FROM tags WHERE id = ?1", params![key], |row| row.get(0))
                    .optional()?;
                data.map(|d| row_to_tag(&d)).transpose()
            })
            .await
    }

    async fn get_all(&self) -> StoreResult<Vec<Tag>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT data FROM tags ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

                let mut tags = Vec::new();
                for data in rows {
                    tags.push(row_to_tag(&data?)?);
                }
                Ok(tags)
            })
            .await
    }

    async fn put(&self, entity: &Tag) -> StoreResult<()> {
        self.db.with_conn(|conn| upsert(conn, entity)).await
    }

    async fn put_all(&self, entities: &[Tag]) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                for tag in entities {
                    upsert(&tx, tag)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn replace_all(&self, entities: &[Tag]) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM tags", [])?;
                for tag in entities {
                    upsert(&tx, tag)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM tags WHERE id = ?1", params![key])?;
                Ok(())
            })
            .await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM tags", [])?;
                Ok(())
            })
            .await
    }
}

fn upsert(conn: &Connection, tag: &Tag) -> StoreResult<()> {
    let data = serde_json::to_string(tag).map_err(|e| StoreError::Corrupt {
        table: "tags",
        message: e.to_string(),
    })?;
    conn.execute(
        "INSERT INTO tags (id, data) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        params![tag.id, data],
    )?;
    Ok(())
}

fn row_to_tag(data: &str) -> StoreResult<Tag> {
    serde_json::from_str(data).map_err(|e| StoreError::Corrupt {
        table: "tags",
        message: e.to_string(),
    })
}
