//! In-memory element store used by tests.
//!
//! Mirrors the Postgres contract exactly (ordering, shape-kind
//! immutability, error surface) so session and hub tests can run without
//! a database. `drop_project` exercises the project-gone teardown path;
//! `set_latency` and `set_deadline_exceeded` simulate a slow database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use uuid::Uuid;

use crate::element::Element;
use crate::store::{ElementStore, ProjectMeta, StoreError};

struct ProjectRecord {
    organization_id: Uuid,
    owner_id: Uuid,
    elements: Vec<Element>,
}

#[derive(Default)]
pub struct MemoryElementStore {
    projects: RwLock<HashMap<Uuid, ProjectRecord>>,
    latency: RwLock<Option<Duration>>,
    deadline_exceeded: AtomicBool,
}

impl MemoryElementStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, project_id: Uuid, organization_id: Uuid, owner_id: Uuid) {
        let mut projects = self.projects.write().await;
        projects.insert(
            project_id,
            ProjectRecord { organization_id, owner_id, elements: Vec::new() },
        );
    }

    /// Drop a project as if the CRUD surface deleted it mid-session.
    pub async fn drop_project(&self, project_id: Uuid) {
        let mut projects = self.projects.write().await;
        projects.remove(&project_id);
    }

    /// Make every element operation take this long, as a stalled
    /// database would.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = Some(latency);
    }

    /// When set, element operations fail with `StoreError::Deadline`.
    pub fn set_deadline_exceeded(&self, exceeded: bool) {
        self.deadline_exceeded.store(exceeded, Ordering::SeqCst);
    }

    async fn element_op(&self) -> Result<(), StoreError> {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            sleep(latency).await;
        }
        if self.deadline_exceeded.load(Ordering::SeqCst) {
            return Err(StoreError::Deadline);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ElementStore for MemoryElementStore {
    async fn load_meta(&self, project_id: Uuid) -> Result<ProjectMeta, StoreError> {
        let projects = self.projects.read().await;
        let record = projects
            .get(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        Ok(ProjectMeta {
            project_id,
            organization_id: record.organization_id,
            owner_id: record.owner_id,
        })
    }

    async fn append(&self, project_id: Uuid, element: &Element) -> Result<(), StoreError> {
        self.element_op().await?;
        let mut projects = self.projects.write().await;
        let record = projects
            .get_mut(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        record.elements.insert(0, element.clone());
        Ok(())
    }

    async fn update_by_id(
        &self,
        project_id: Uuid,
        element_id: Uuid,
        element: &Element,
    ) -> Result<Element, StoreError> {
        self.element_op().await?;
        let mut projects = self.projects.write().await;
        let record = projects
            .get_mut(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        let Some(slot) = record
            .elements
            .iter_mut()
            .find(|e| e.element_id == element_id)
        else {
            return Err(StoreError::ElementMissing(element_id));
        };
        if slot.shape_kind != element.shape_kind {
            return Err(StoreError::ElementMissing(element_id));
        }

        let committed = Element {
            element_id,
            created_at: slot.created_at,
            ..element.clone()
        };
        *slot = committed.clone();
        Ok(committed)
    }

    async fn remove_by_id(&self, project_id: Uuid, element_id: Uuid) -> Result<(), StoreError> {
        self.element_op().await?;
        let mut projects = self.projects.write().await;
        let record = projects
            .get_mut(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        let before = record.elements.len();
        record.elements.retain(|e| e.element_id != element_id);
        if record.elements.len() == before {
            return Err(StoreError::ElementMissing(element_id));
        }
        Ok(())
    }

    async fn load_all(&self, project_id: Uuid) -> Result<Vec<Element>, StoreError> {
        self.element_op().await?;
        let projects = self.projects.read().await;
        let record = projects
            .get(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        Ok(record.elements.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementDraft, ShapeKind};
    use serde_json::json;

    fn draft(kind: &str) -> ElementDraft {
        serde_json::from_value(json!({ "shape_kind": kind, "x": 1.0 })).unwrap()
    }

    async fn seeded() -> (MemoryElementStore, Uuid) {
        let store = MemoryElementStore::new();
        let project_id = Uuid::new_v4();
        store
            .insert_project(project_id, Uuid::new_v4(), Uuid::new_v4())
            .await;
        (store, project_id)
    }

    #[tokio::test]
    async fn append_prepends_newest_first() {
        let (store, project_id) = seeded().await;
        let first = Element::mint(draft("Rectangle"));
        let second = Element::mint(draft("Circle"));
        store.append(project_id, &first).await.unwrap();
        store.append(project_id, &second).await.unwrap();

        let all = store.load_all(project_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].element_id, second.element_id);
        assert_eq!(all[1].element_id, first.element_id);
    }

    #[tokio::test]
    async fn create_then_delete_leaves_no_trace() {
        let (store, project_id) = seeded().await;
        let element = Element::mint(draft("Shape"));
        store.append(project_id, &element).await.unwrap();
        store
            .remove_by_id(project_id, element.element_id)
            .await
            .unwrap();

        let all = store.load_all(project_id).await.unwrap();
        assert!(all.iter().all(|e| e.element_id != element.element_id));
    }

    #[tokio::test]
    async fn create_then_update_replaces_attributes() {
        let (store, project_id) = seeded().await;
        let element = Element::mint(draft("Circle"));
        store.append(project_id, &element).await.unwrap();

        let mut replacement: ElementDraft =
            serde_json::from_value(json!({ "shape_kind": "Circle", "radius": 99 })).unwrap();
        replacement.is_deleted = false;
        let committed = store
            .update_by_id(
                project_id,
                element.element_id,
                &Element::replacement(element.element_id, replacement),
            )
            .await
            .unwrap();

        assert_eq!(committed.attrs.get("radius"), Some(&json!(99)));
        // The original creation timestamp survives the replacement.
        assert_eq!(committed.created_at, element.created_at);

        let all = store.load_all(project_id).await.unwrap();
        assert_eq!(all[0].attrs.get("radius"), Some(&json!(99)));
    }

    #[tokio::test]
    async fn update_rejects_shape_kind_change() {
        let (store, project_id) = seeded().await;
        let element = Element::mint(draft("Rectangle"));
        store.append(project_id, &element).await.unwrap();

        let morphed = Element::replacement(element.element_id, draft("Circle"));
        let err = store
            .update_by_id(project_id, element.element_id, &morphed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ElementMissing(_)));

        let all = store.load_all(project_id).await.unwrap();
        assert_eq!(all[0].shape_kind, ShapeKind::Rectangle);
    }

    #[tokio::test]
    async fn unknown_element_is_missing() {
        let (store, project_id) = seeded().await;
        let err = store
            .remove_by_id(project_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ElementMissing(_)));
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let store = MemoryElementStore::new();
        let element = Element::mint(draft("Circle"));
        let err = store.append(Uuid::new_v4(), &element).await.unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));

        let err = store.load_all(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }
}
