//! Outbox Entry
//!
//! One local mutation that has not been confirmed by the server yet.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use super::entity::Entity;

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxAction {
    Create,
    Update,
    Delete,
}

impl OutboxAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxAction::Create => "create",
            OutboxAction::Update => "update",
            OutboxAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(OutboxAction::Create),
            "update" => Some(OutboxAction::Update),
            "delete" => Some(OutboxAction::Delete),
            _ => None,
        }
    }
}

/// A pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// UUID v4; queue order comes from the store, not from this id
    pub id: String,
    pub action: OutboxAction,
    pub task_id: String,
    /// Original request body, absent for deletes
    pub payload: Option<Value>,
    /// Enqueue time, epoch ms
    pub timestamp: i64,
    pub retries: u32,
}

impl OutboxEntry {
    pub fn new(action: OutboxAction, task_id: &str, payload: Option<Value>, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            task_id: task_id.to_string(),
            payload,
            timestamp: now_ms,
            retries: 0,
        }
    }
}

impl Entity for OutboxEntry {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Sync metadata record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Last successful full sync, epoch ms (0 = never)
    pub last_sync: i64,
}
