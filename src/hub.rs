//! Hub Registry — process-wide project-to-session map.
//!
//! DESIGN
//! ======
//! One lock guards the whole registry; `admit`, `disconnect`, `evict` and
//! `teardown` all run under it, so an arriving client either finds a live
//! session or creates a fresh one and can never attach to one whose
//! worker is exiting. Session membership is mutated only here; the worker
//! reads snapshots.
//!
//! A session dies by channel closure, never by an explicit kill: the
//! registry holds one inbound sender per session and each reader holds a
//! clone. Removing the map entry drops the registry's sender; once the
//! last reader clone drops, the worker drains what is queued and stops.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;
use uuid::Uuid;

use crate::auth::Identity;
use crate::frame::ServerEvent;
use crate::session::{ClientHandle, CloseReason, Session, SessionCommand, spawn_worker};
use crate::store::{ElementStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error("project not found: {0}")]
    UnknownProject(Uuid),
    #[error("organization mismatch")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a successfully admitted connection needs to participate.
#[derive(Debug)]
pub struct Admission {
    /// Connection epoch, echoed back on `disconnect`.
    pub conn_id: Uuid,
    /// Where the connection reader enqueues decoded commands.
    pub inbound: mpsc::Sender<SessionCommand>,
}

struct SessionEntry {
    session: Arc<Session>,
    inbound: mpsc::Sender<SessionCommand>,
}

pub struct Hub {
    store: Arc<dyn ElementStore>,
    inbound_queue_depth: usize,
    /// Self-reference handed to session workers so they can evict slow
    /// peers through the registry lock.
    me: Weak<Hub>,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl Hub {
    #[must_use]
    pub fn new(store: Arc<dyn ElementStore>, inbound_queue_depth: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            inbound_queue_depth,
            me: me.clone(),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Authorise and attach one connection.
    ///
    /// Resolves the project's organisation from the store, rejects a
    /// mismatch, then inserts the client into the project's session
    /// (creating it, and its worker, on first join). A connection already
    /// present under the same client id is closed with reason `replaced`
    /// before the new one is inserted.
    ///
    /// # Errors
    ///
    /// `UnknownProject` if no such project exists, `Forbidden` on an
    /// organisation mismatch, `Store` if the lookup itself failed.
    pub async fn admit(
        &self,
        project_id: Uuid,
        identity: Identity,
        tx: mpsc::Sender<ServerEvent>,
        close: watch::Sender<Option<CloseReason>>,
    ) -> Result<Admission, AdmitError> {
        let meta = self.store.load_meta(project_id).await.map_err(|e| match e {
            StoreError::ProjectNotFound(id) => AdmitError::UnknownProject(id),
            other => AdmitError::Store(other),
        })?;
        if meta.organization_id != identity.organization_id {
            return Err(AdmitError::Forbidden);
        }

        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&project_id) {
            let session = Arc::new(Session::new(meta.project_id, meta.organization_id));
            let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_queue_depth);
            spawn_worker(
                Arc::clone(&session),
                Arc::clone(&self.store),
                self.me.clone(),
                inbound_rx,
            );
            sessions.insert(project_id, SessionEntry { session, inbound: inbound_tx });
            info!(%project_id, owner_id = %meta.owner_id, "session created");
        }
        let entry = sessions
            .get(&project_id)
            .ok_or(AdmitError::UnknownProject(project_id))?;

        // Single live connection per user and project: the older link is
        // told to close and its handles are dropped. The close signal is
        // out of band, so a backed-up frame queue cannot lose it.
        if let Some(previous) = entry.session.take_client(identity.user_id).await {
            info!(%project_id, client_id = %identity.user_id, "replacing existing connection");
            previous.shutdown(CloseReason::Replaced);
        }

        let conn_id = Uuid::new_v4();
        let handle = ClientHandle { identity, conn_id, tx, close };
        info!(
            %project_id,
            client_id = %handle.identity.user_id,
            username = %handle.identity.username,
            "client admitted"
        );
        entry.session.insert_client(handle).await;

        Ok(Admission { conn_id, inbound: entry.inbound.clone() })
    }

    /// Detach one connection at end of life. A no-op when the epoch does
    /// not match (the connection was already replaced or evicted).
    ///
    /// Departure frames are enqueued as a session command so peers see
    /// them in the project's total order. An emptied session is removed
    /// from the map under the same lock, which lets its worker exit.
    pub async fn disconnect(&self, project_id: Uuid, client_id: Uuid, conn_id: Uuid) {
        // The awaited enqueue happens outside the registry lock: a full
        // inbound queue then only stalls the departing connection's task,
        // and the departure frames are never dropped.
        let leave = {
            let mut sessions = self.sessions.lock().await;
            let Some(entry) = sessions.get(&project_id) else {
                return;
            };
            let Some(handle) = entry.session.remove_client(client_id, conn_id).await else {
                return;
            };
            info!(%project_id, %client_id, "client disconnected");

            if entry.session.is_empty().await {
                sessions.remove(&project_id);
                info!(%project_id, "session removed (empty)");
                None
            } else {
                Some((entry.inbound.clone(), handle.identity.sender()))
            }
        };
        if let Some((inbound, sender)) = leave {
            let _ = inbound.send(SessionCommand::Leave { sender }).await;
        }
    }

    /// Forcibly detach a peer whose outbound queue overflowed. Returns
    /// whether the peer was still a member. The caller raises the peer's
    /// close signal; nothing is pushed through the full frame queue.
    pub(crate) async fn evict(&self, project_id: Uuid, client_id: Uuid, conn_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get(&project_id) else {
            return false;
        };
        if entry
            .session
            .remove_client(client_id, conn_id)
            .await
            .is_none()
        {
            return false;
        }
        info!(%project_id, %client_id, "client evicted");
        if entry.session.is_empty().await {
            sessions.remove(&project_id);
            info!(%project_id, "session removed (empty)");
        }
        true
    }

    /// Drop a whole session (project disappeared mid-flight) and hand the
    /// detached clients back so the caller can close them.
    pub(crate) async fn teardown(&self, project_id: Uuid) -> Vec<ClientHandle> {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.remove(&project_id) else {
            return Vec::new();
        };
        info!(%project_id, "session torn down");
        entry.session.drain_clients().await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn client_count(&self, project_id: Uuid) -> usize {
        let sessions = self.sessions.lock().await;
        match sessions.get(&project_id) {
            Some(entry) => entry.session.client_count().await,
            None => 0,
        }
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
