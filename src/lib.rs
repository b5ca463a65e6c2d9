//! HABoard offline sync engine
//!
//! - domain: task, tag and outbox entities
//! - repository: SQLite-backed local tables
//! - api: task server client with retry/backoff
//! - push: live change stream with reconnection
//! - store: reactive state observed by the UI
//! - sync: the engine tying them together

pub mod api;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod push;
pub mod repository;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{get_sync_config, save_sync_config, SyncConfig};
pub use domain::{NewTag, NewTask, OutboxAction, OutboxEntry, Priority, Tag, Task, TaskPatch};
pub use error::{ApiError, PushError, Result, StoreError, SyncError};
pub use repository::LocalStore;
pub use store::StateReader;
pub use sync::{BackgroundSync, Connectivity, ManualConnectivity, SyncEngine, SyncEngineBuilder};
