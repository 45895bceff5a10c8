//! Element Store — durable, authoritative per-project element list.
//!
//! ARCHITECTURE
//! ============
//! One document per design project holds an ordered `elements` list,
//! newest-first. The session worker awaits durability here before any
//! fan-out, so every `Receive*` frame a peer observes corresponds to a
//! persisted state change. The trait seam exists so session and hub
//! behavior is testable against an in-memory double.

use async_trait::async_trait;
use uuid::Uuid;

use crate::element::Element;

pub mod pg;

#[cfg(test)]
pub mod memory;

pub use pg::PgElementStore;

// =============================================================================
// TYPES
// =============================================================================

/// Project document header, read once at admission.
#[derive(Debug, Clone, Copy)]
pub struct ProjectMeta {
    pub project_id: Uuid,
    pub organization_id: Uuid,
    pub owner_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("element not found: {0}")]
    ElementMissing(Uuid),
    #[error("store operation timed out")]
    Deadline,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("element codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Four operations, each atomic with respect to concurrent calls on the
/// same project.
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// Read the project header for admission.
    async fn load_meta(&self, project_id: Uuid) -> Result<ProjectMeta, StoreError>;

    /// Prepend one element (the list is newest-first).
    async fn append(&self, project_id: Uuid, element: &Element) -> Result<(), StoreError>;

    /// Replace the element with id `element_id` in place and return the
    /// committed image. The stored `created_at` is preserved; a
    /// `shape_kind` change is rejected as `ElementMissing`.
    async fn update_by_id(
        &self,
        project_id: Uuid,
        element_id: Uuid,
        element: &Element,
    ) -> Result<Element, StoreError>;

    /// Remove the element with id `element_id`. Hard delete, no tombstone.
    async fn remove_by_id(&self, project_id: Uuid, element_id: Uuid) -> Result<(), StoreError>;

    /// Whole-list read, newest-first.
    async fn load_all(&self, project_id: Uuid) -> Result<Vec<Element>, StoreError>;
}
