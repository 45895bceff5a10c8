//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It carries the immutable configuration, the element store behind its
//! trait seam, the hub registry, and the token verifier. Everything is
//! cheap to clone; the hub and store are shared via `Arc`.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::hub::Hub;
use crate::store::ElementStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ElementStore>,
    pub hub: Arc<Hub>,
    pub verifier: TokenVerifier,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn ElementStore>) -> Self {
        let hub = Hub::new(Arc::clone(&store), config.inbound_queue_depth);
        let verifier = TokenVerifier::new(&config.token_key);
        Self { config: Arc::new(config), store, hub, verifier }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::auth::Identity;
    use crate::config::Config;
    use crate::store::memory::MemoryElementStore;
    use uuid::Uuid;

    /// Create a test `AppState` over an in-memory store, returning the
    /// store too so tests can seed and inspect it.
    #[must_use]
    pub fn test_app_state() -> (AppState, Arc<MemoryElementStore>) {
        test_app_state_with(Config::test_default())
    }

    /// Same, with explicit configuration (queue depths and the like).
    #[must_use]
    pub fn test_app_state_with(config: Config) -> (AppState, Arc<MemoryElementStore>) {
        let store = Arc::new(MemoryElementStore::new());
        let state = AppState::new(config, store.clone());
        (state, store)
    }

    /// Seed an empty project and return its id and organisation id.
    pub async fn seed_project(store: &MemoryElementStore) -> (Uuid, Uuid) {
        let project_id = Uuid::new_v4();
        let organization_id = Uuid::new_v4();
        store
            .insert_project(project_id, organization_id, Uuid::new_v4())
            .await;
        (project_id, organization_id)
    }

    /// A distinct identity in the given organisation.
    #[must_use]
    pub fn member(organization_id: Uuid, username: &str) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: username.into(),
            email: format!("{username}@example.com"),
            role: "editor".into(),
            organization_id,
        }
    }
}
