//! Element — one graphical primitive in a design project.
//!
//! DESIGN
//! ======
//! The hub treats elements as mostly opaque: it dispatches on `element_id`
//! and `shape_kind` and never inspects geometry or style. Everything else
//! (position, size, rotation, fills, strokes, gradient stops, ...) rides in
//! a flattened attribute map so the wire payload is preserved bit-exactly
//! through commit and fan-out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// SHAPE KIND
// =============================================================================

/// Closed set of element discriminants. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Shape,
}

// =============================================================================
// ELEMENT
// =============================================================================

/// A committed element. `attrs` carries every client-supplied field the hub
/// does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub element_id: Uuid,
    pub shape_kind: ShapeKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

/// Client-supplied element payload: no id, no bookkeeping. The server mints
/// the id and stamps timestamps on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDraft {
    pub shape_kind: ShapeKind,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Element {
    /// Mint a fresh element from a create payload. The id is server-assigned.
    #[must_use]
    pub fn mint(draft: ElementDraft) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            element_id: Uuid::new_v4(),
            shape_kind: draft.shape_kind,
            created_at: now,
            updated_at: now,
            is_deleted: draft.is_deleted,
            attrs: draft.attrs,
        }
    }

    /// Build the replacement image for an update of `element_id`. The store
    /// preserves the stored `created_at` when it commits the replacement.
    #[must_use]
    pub fn replacement(element_id: Uuid, draft: ElementDraft) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            element_id,
            shape_kind: draft.shape_kind,
            created_at: now,
            updated_at: now,
            is_deleted: draft.is_deleted,
            attrs: draft.attrs,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
