//! Tag Entity
//!
//! Tags are attached to tasks by id. Name uniqueness is enforced server-side.

use serde::{Deserialize, Serialize};
use super::entity::Entity;

/// A tag for categorizing tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    /// Color (hex, e.g., "#FF5733")
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Entity for Tag {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Create request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}
