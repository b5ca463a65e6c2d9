//! Task Entity
//!
//! A task as the server knows it, plus the request bodies used to create and
//! patch one.

use serde::{Deserialize, Deserializer, Serialize};
use super::entity::Entity;

/// Priority levels (0 = none, 3 = high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn level(&self) -> u8 {
        match self {
            Priority::None => 0,
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
        }
    }

    /// Out-of-range levels are treated as high
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Priority::None,
            1 => Priority::Low,
            2 => Priority::Medium,
            _ => Priority::High,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::None => "None",
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

/// A task item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Client-generated UUID, never reassigned
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub due_time: Option<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// ISO-8601
    pub created_at: String,
    /// ISO-8601
    pub modified_at: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "first_version")]
    pub version: u64,
    /// Tag ids, order preserved
    #[serde(default)]
    pub tags: Vec<String>,
}

fn first_version() -> u64 {
    1
}

impl Task {
    /// Build a fresh local task from a create request
    pub fn new_local(id: String, data: &NewTask, device_id: &str, now: &str) -> Self {
        Self {
            id,
            title: data.title.clone(),
            notes: data.notes.clone(),
            due_date: data.due_date.clone(),
            due_time: data.due_time.clone(),
            priority: data.priority.unwrap_or(0),
            completed: false,
            completed_at: None,
            created_at: now.to_string(),
            modified_at: now.to_string(),
            device_id: device_id.to_string(),
            version: 1,
            tags: data.tags.clone().unwrap_or_default(),
        }
    }

    pub fn priority(&self) -> Priority {
        Priority::from_level(self.priority)
    }

    /// Merge a patch as a local edit: bumps version and modification time
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: &str) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(due_date) = &patch.due_date {
            self.due_date = due_date.clone();
        }
        if let Some(due_time) = &patch.due_time {
            self.due_time = due_time.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(completed_at) = &patch.completed_at {
            self.completed_at = completed_at.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        self.modified_at = now.to_string();
        self.version += 1;
    }
}

impl Entity for Task {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Create request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial update body. Absent fields are left untouched.
///
/// The nullable fields (`notes`, `due_date`, `due_time`, `completed_at`)
/// distinguish "absent" (`None`) from "clear" (`Some(None)`), which
/// serializes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub notes: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub due_date: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub due_time: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub completed_at: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}
