//! Sync Layer
//!
//! - env: host capabilities (connectivity, background wake-ups)
//! - engine: optimistic mutations, outbox replay, reconciliation, push events

mod engine;
mod env;


pub use engine::{SyncEngine, SyncEngineBuilder};
pub use env::{BackgroundSync, Connectivity, ManualConnectivity, BACKGROUND_SYNC_TAG};
