//! Session — per-project serialisation domain.
//!
//! ARCHITECTURE
//! ============
//! All mutations for one project flow through a bounded inbound queue
//! drained by a single worker task. The worker commits to the element
//! store, acks the origin, then fans out to peers; because nothing else
//! mutates project state, every participant observes the same total order
//! of committed events.
//!
//! DESIGN
//! ======
//! - Durability before broadcast: the store call is awaited before any
//!   frame leaves the worker.
//! - Ack first, then peer fan-out, within one command.
//! - Fan-out never blocks: a peer whose outbound queue is full loses the
//!   frame and is disconnected. A slow client cannot stall the project.
//! - Close travels out of band: each connection carries a watch signal
//!   next to its frame queue, so a full queue can never swallow a
//!   shutdown.
//! - Membership (`clients`) is mutated only by the Hub Registry under the
//!   registry lock; the worker reads snapshots at fan-out time.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::element::Element;
use crate::frame::{ClientEvent, Sender, ServerEvent};
use crate::hub::Hub;
use crate::store::{ElementStore, StoreError};

// =============================================================================
// CONNECTION HANDLE
// =============================================================================

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The same user opened a newer connection to this project.
    Replaced,
    /// Authorisation failure or project disappearance.
    PolicyViolation,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replaced => "replaced",
            Self::PolicyViolation => "policy-violation",
        }
    }
}

/// One live connection as the session sees it. Frames ride the bounded
/// `tx` queue; close is signalled through `close` instead of the queue,
/// so backpressure cannot delay or drop it.
#[derive(Clone)]
pub struct ClientHandle {
    pub identity: Identity,
    /// Connection epoch: distinguishes a replaced link from its successor
    /// under the same client id.
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<ServerEvent>,
    pub close: watch::Sender<Option<CloseReason>>,
}

impl ClientHandle {
    /// Tell the connection to close. Both transport halves watch this
    /// signal, so it lands even when the frame queue is full.
    pub(crate) fn shutdown(&self, reason: CloseReason) {
        let _ = self.close.send(Some(reason));
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Inbound queue item. `Client` entries come from connection readers;
/// `Leave` is enqueued by the registry so departure frames share the
/// session's total order.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Client { client_id: Uuid, event: ClientEvent },
    Leave { sender: Sender },
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    pub project_id: Uuid,
    pub organization_id: Uuid,
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
}

impl Session {
    #[must_use]
    pub fn new(project_id: Uuid, organization_id: Uuid) -> Self {
        Self { project_id, organization_id, clients: RwLock::new(HashMap::new()) }
    }

    // --- membership, driven by the Hub Registry under its lock ---

    pub(crate) async fn insert_client(&self, handle: ClientHandle) {
        let mut clients = self.clients.write().await;
        clients.insert(handle.identity.user_id, handle);
    }

    /// Remove a client regardless of connection epoch (replacement path).
    pub(crate) async fn take_client(&self, client_id: Uuid) -> Option<ClientHandle> {
        let mut clients = self.clients.write().await;
        clients.remove(&client_id)
    }

    /// Remove a client only if the connection epoch matches, so a stale
    /// reader cannot evict its replacement.
    pub(crate) async fn remove_client(&self, client_id: Uuid, conn_id: Uuid) -> Option<ClientHandle> {
        let mut clients = self.clients.write().await;
        if clients.get(&client_id).is_some_and(|h| h.conn_id == conn_id) {
            clients.remove(&client_id)
        } else {
            None
        }
    }

    pub(crate) async fn drain_clients(&self) -> Vec<ClientHandle> {
        let mut clients = self.clients.write().await;
        clients.drain().map(|(_, handle)| handle).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn lookup(&self, client_id: Uuid) -> Option<ClientHandle> {
        self.clients.read().await.get(&client_id).cloned()
    }

    async fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.read().await.values().cloned().collect()
    }

    // --- outbound ---

    async fn send_to(&self, handle: &ClientHandle, frame: ServerEvent, hub: &Hub) {
        match handle.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.evict_slow(handle, hub).await,
            // Writer already gone; the connection task is shutting down.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Enqueue a frame onto every peer's outbound queue. Never blocks: a
    /// full queue drops the frame and disconnects that peer.
    async fn fan_out(&self, frame: &ServerEvent, exclude: Option<Uuid>, hub: &Hub) {
        let mut slow: Vec<ClientHandle> = Vec::new();
        for handle in self.snapshot().await {
            if exclude == Some(handle.identity.user_id) {
                continue;
            }
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => slow.push(handle),
                Err(TrySendError::Closed(_)) => {}
            }
        }
        for handle in slow {
            self.evict_slow(&handle, hub).await;
        }
    }

    /// Fan-out without eviction, used while already handling an eviction.
    async fn best_effort_fan(&self, frame: &ServerEvent) {
        for handle in self.snapshot().await {
            let _ = handle.tx.try_send(frame.clone());
        }
    }

    async fn evict_slow(&self, handle: &ClientHandle, hub: &Hub) {
        warn!(
            project_id = %self.project_id,
            client_id = %handle.identity.user_id,
            "outbound queue full; disconnecting peer"
        );
        if !hub
            .evict(self.project_id, handle.identity.user_id, handle.conn_id)
            .await
        {
            return;
        }
        handle.shutdown(CloseReason::PolicyViolation);
        let sender = handle.identity.sender();
        self.best_effort_fan(&ServerEvent::ReceiveUserCursorLeft { sender: sender.clone() })
            .await;
        self.best_effort_fan(&ServerEvent::Disconnect { sender }).await;
    }

    // --- command processing ---

    /// Handle one inbound command. Returns `false` when the session must
    /// stop (project gone).
    async fn process(
        &self,
        origin_id: Uuid,
        event: ClientEvent,
        store: &dyn ElementStore,
        hub: &Hub,
    ) -> bool {
        let Some(origin) = self.lookup(origin_id).await else {
            // Residual command from a client that already departed.
            debug!(project_id = %self.project_id, client_id = %origin_id, "dropping command from departed client");
            return true;
        };
        if !matches!(event, ClientEvent::UpdateUserCursor(_)) {
            debug!(
                project_id = %self.project_id,
                client_id = %origin_id,
                event = event.tag(),
                "session: recv command"
            );
        }
        let sender = origin.identity.sender();

        match event {
            ClientEvent::Ping => {
                self.send_to(&origin, ServerEvent::Pong {}, hub).await;
            }
            ClientEvent::Broadcast => {
                let frame = ServerEvent::Broadcast {
                    message: format!("broadcast from {}", origin.identity.username),
                };
                self.fan_out(&frame, Some(origin_id), hub).await;
            }
            ClientEvent::CreateElement(payload) => {
                let element = Element::mint(payload.element);
                info!(
                    project_id = %self.project_id,
                    client_id = %origin_id,
                    element_id = %element.element_id,
                    "create element"
                );
                match store.append(self.project_id, &element).await {
                    Ok(()) => {
                        let mut created = HashMap::new();
                        created.insert(payload.temporary_element_id, element.clone());
                        self.send_to(&origin, ServerEvent::ElementCreated(created), hub)
                            .await;
                        self.fan_out(
                            &ServerEvent::ReceiveElementCreated { element, sender },
                            Some(origin_id),
                            hub,
                        )
                        .await;
                    }
                    Err(StoreError::ProjectNotFound(_)) => {
                        return self.project_gone(&origin, hub).await;
                    }
                    Err(e) => self.report(&origin, &e, hub).await,
                }
            }
            ClientEvent::UpdateElement(payload) => {
                let candidate = Element::replacement(payload.element_id, payload.element);
                match store
                    .update_by_id(self.project_id, payload.element_id, &candidate)
                    .await
                {
                    Ok(element) => {
                        info!(
                            project_id = %self.project_id,
                            client_id = %origin_id,
                            element_id = %payload.element_id,
                            "update element"
                        );
                        self.send_to(
                            &origin,
                            ServerEvent::ElementUpdated { element: element.clone() },
                            hub,
                        )
                        .await;
                        self.fan_out(
                            &ServerEvent::ReceiveElementUpdated { element, sender },
                            Some(origin_id),
                            hub,
                        )
                        .await;
                    }
                    Err(StoreError::ProjectNotFound(_)) => {
                        return self.project_gone(&origin, hub).await;
                    }
                    Err(e) => self.report(&origin, &e, hub).await,
                }
            }
            ClientEvent::DeleteElement(payload) => {
                match store.remove_by_id(self.project_id, payload.element_id).await {
                    Ok(()) => {
                        info!(
                            project_id = %self.project_id,
                            client_id = %origin_id,
                            element_id = %payload.element_id,
                            "delete element"
                        );
                        self.send_to(
                            &origin,
                            ServerEvent::ElementDeleted { deleted_element_id: payload.element_id },
                            hub,
                        )
                        .await;
                        self.fan_out(
                            &ServerEvent::ReceiveElementDeleted {
                                deleted_element_id: payload.element_id,
                                sender,
                            },
                            Some(origin_id),
                            hub,
                        )
                        .await;
                    }
                    Err(StoreError::ProjectNotFound(_)) => {
                        return self.project_gone(&origin, hub).await;
                    }
                    Err(e) => self.report(&origin, &e, hub).await,
                }
            }
            ClientEvent::JoinUserCursor => {
                let roster: Vec<Sender> = self
                    .snapshot()
                    .await
                    .iter()
                    .filter(|h| h.identity.user_id != origin_id)
                    .map(|h| h.identity.sender())
                    .collect();
                self.send_to(&origin, ServerEvent::CurrentUsers(roster), hub)
                    .await;
                self.fan_out(
                    &ServerEvent::ReceiveUserCursorJoined { sender },
                    Some(origin_id),
                    hub,
                )
                .await;
            }
            ClientEvent::UpdateUserCursor(cursor) => {
                // Forwarded verbatim; never persisted, never acked.
                self.fan_out(
                    &ServerEvent::ReceiveUserCursorUpdated { cursor, sender },
                    Some(origin_id),
                    hub,
                )
                .await;
            }
        }
        true
    }

    /// Store reported the project missing mid-session: error the origin,
    /// close every connection with a policy violation, stop the worker.
    async fn project_gone(&self, origin: &ClientHandle, hub: &Hub) -> bool {
        error!(project_id = %self.project_id, "project disappeared mid-session; tearing down");
        let _ = origin.tx.try_send(ServerEvent::Error {
            message: StoreError::ProjectNotFound(self.project_id).to_string(),
        });
        for handle in hub.teardown(self.project_id).await {
            handle.shutdown(CloseReason::PolicyViolation);
        }
        false
    }

    /// Reply with an Error frame; the connection stays open, nothing is
    /// fanned out.
    async fn report(&self, origin: &ClientHandle, err: &StoreError, hub: &Hub) {
        if matches!(err, StoreError::Database(_) | StoreError::Codec(_) | StoreError::Deadline) {
            warn!(project_id = %self.project_id, error = %err, "store operation failed");
        }
        self.send_to(origin, ServerEvent::Error { message: err.to_string() }, hub)
            .await;
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Spawn the single worker that drains a session's inbound queue. The
/// worker exits once every inbound sender is dropped (last client gone)
/// or the project disappears.
pub(crate) fn spawn_worker(
    session: Arc<Session>,
    store: Arc<dyn ElementStore>,
    hub: Weak<Hub>,
    mut inbound: mpsc::Receiver<SessionCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            project_id = %session.project_id,
            organization_id = %session.organization_id,
            "session worker started"
        );
        while let Some(command) = inbound.recv().await {
            // The registry owns this worker; if it is gone the process is
            // shutting down.
            let Some(hub) = hub.upgrade() else { break };
            match command {
                SessionCommand::Client { client_id, event } => {
                    if !session.process(client_id, event, store.as_ref(), &hub).await {
                        break;
                    }
                }
                SessionCommand::Leave { sender } => {
                    session
                        .fan_out(&ServerEvent::ReceiveUserCursorLeft { sender: sender.clone() }, None, &hub)
                        .await;
                    session
                        .fan_out(&ServerEvent::Disconnect { sender }, None, &hub)
                        .await;
                }
            }
        }
        info!(project_id = %session.project_id, "session worker stopped");
    })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
