//! Postgres-backed element store.
//!
//! DESIGN
//! ======
//! Each project is one row; the element list lives in an `elements` jsonb
//! column, newest-first. Prepend is a single jsonb concatenation; update
//! and remove take a row lock (`FOR UPDATE`) so the read-modify-write is
//! atomic per project. Every operation runs under the configured deadline
//! and surfaces a timeout as `StoreError::Deadline` instead of hanging the
//! session worker.

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::element::Element;
use crate::store::{ElementStore, ProjectMeta, StoreError};

pub struct PgElementStore {
    pool: PgPool,
    deadline: Duration,
}

impl PgElementStore {
    #[must_use]
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.deadline, op)
            .await
            .map_err(|_| StoreError::Deadline)?
    }

    /// Lock the project row and return its element list.
    async fn lock_elements(
        tx: &mut sqlx::PgTransaction<'_>,
        project_id: Uuid,
    ) -> Result<Vec<Element>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT elements FROM design_projects WHERE id = $1 FOR UPDATE")
                .bind(project_id)
                .fetch_optional(&mut **tx)
                .await?;
        let Some((value,)) = row else {
            return Err(StoreError::ProjectNotFound(project_id));
        };
        Ok(serde_json::from_value(value)?)
    }

    async fn write_elements(
        tx: &mut sqlx::PgTransaction<'_>,
        project_id: Uuid,
        elements: &[Element],
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE design_projects SET elements = $2, updated_at = now() WHERE id = $1")
            .bind(project_id)
            .bind(serde_json::to_value(elements)?)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ElementStore for PgElementStore {
    async fn load_meta(&self, project_id: Uuid) -> Result<ProjectMeta, StoreError> {
        self.bounded(async {
            let row: Option<(Uuid, Uuid)> = sqlx::query_as(
                "SELECT organization_id, owner_id FROM design_projects WHERE id = $1",
            )
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
            let Some((organization_id, owner_id)) = row else {
                return Err(StoreError::ProjectNotFound(project_id));
            };
            Ok(ProjectMeta { project_id, organization_id, owner_id })
        })
        .await
    }

    async fn append(&self, project_id: Uuid, element: &Element) -> Result<(), StoreError> {
        self.bounded(async {
            // Single-statement prepend keeps the operation atomic without a
            // transaction: jsonb array concatenation with the new head first.
            let head = serde_json::to_value(std::slice::from_ref(element))?;
            let done = sqlx::query(
                "UPDATE design_projects
                 SET elements = $2::jsonb || elements, updated_at = now()
                 WHERE id = $1",
            )
            .bind(project_id)
            .bind(head)
            .execute(&self.pool)
            .await?;

            if done.rows_affected() == 0 {
                return Err(StoreError::ProjectNotFound(project_id));
            }
            Ok(())
        })
        .await
    }

    async fn update_by_id(
        &self,
        project_id: Uuid,
        element_id: Uuid,
        element: &Element,
    ) -> Result<Element, StoreError> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let mut elements = Self::lock_elements(&mut tx, project_id).await?;

            let Some(slot) = elements.iter_mut().find(|e| e.element_id == element_id) else {
                return Err(StoreError::ElementMissing(element_id));
            };
            if slot.shape_kind != element.shape_kind {
                // shape_kind is immutable after creation.
                return Err(StoreError::ElementMissing(element_id));
            }

            let committed = Element {
                element_id,
                created_at: slot.created_at,
                ..element.clone()
            };
            *slot = committed.clone();

            Self::write_elements(&mut tx, project_id, &elements).await?;
            tx.commit().await?;
            Ok(committed)
        })
        .await
    }

    async fn remove_by_id(&self, project_id: Uuid, element_id: Uuid) -> Result<(), StoreError> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let mut elements = Self::lock_elements(&mut tx, project_id).await?;

            let before = elements.len();
            elements.retain(|e| e.element_id != element_id);
            if elements.len() == before {
                return Err(StoreError::ElementMissing(element_id));
            }

            Self::write_elements(&mut tx, project_id, &elements).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn load_all(&self, project_id: Uuid) -> Result<Vec<Element>, StoreError> {
        self.bounded(async {
            let row: Option<(serde_json::Value,)> =
                sqlx::query_as("SELECT elements FROM design_projects WHERE id = $1")
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let Some((value,)) = row else {
                return Err(StoreError::ProjectNotFound(project_id));
            };
            Ok(serde_json::from_value(value)?)
        })
        .await
    }
}
