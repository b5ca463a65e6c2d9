//! Domain Layer - Core Entity Trait
//!
//! Every record kept in a keyed table implements this trait.

/// Core trait for all stored entities
pub trait Entity: Sized + Send + Sync + Clone {
    /// Table key of the entity
    fn key(&self) -> &str;
}
