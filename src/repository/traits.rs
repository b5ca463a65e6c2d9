//! Repository Layer - Core Traits
//!
//! Keyed-table contract shared by the task and tag tables.

use async_trait::async_trait;
use crate::domain::Entity;
use crate::error::StoreResult;

/// Keyed table of entities
///
/// Multi-record writes (`put_all`, `replace_all`) are atomic: concurrent
/// readers see either all of the new records or none of them.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Find entity by key
    async fn get(&self, key: &str) -> StoreResult<Option<T>>;

    /// List all entities
    async fn get_all(&self) -> StoreResult<Vec<T>>;

    /// Insert or overwrite one entity
    async fn put(&self, entity: &T) -> StoreResult<()>;

    /// Insert or overwrite many entities in one transaction
    async fn put_all(&self, entities: &[T]) -> StoreResult<()>;

    /// Make the table contain exactly `entities`, in one transaction
    async fn replace_all(&self, entities: &[T]) -> StoreResult<()>;

    /// Delete entity by key
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remove every entity
    async fn clear(&self) -> StoreResult<()>;
}
