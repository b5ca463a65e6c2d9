//! Domain Layer
//!
//! Entities shared by the store, the server client and the sync engine.
//! This layer has NO I/O (serde and uuid only).

mod entity;
mod outbox;
mod tag;
mod task;

pub use entity::Entity;
pub use outbox::{OutboxAction, OutboxEntry, SyncMetadata};
pub use tag::{NewTag, Tag};
pub use task::{NewTask, Priority, Task, TaskPatch};
