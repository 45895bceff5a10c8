//! Frame codec — the `{event, payload}` wire message set.
//!
//! ARCHITECTURE
//! ============
//! Every frame on the wire is a JSON object with exactly two top-level
//! fields: `event` (a tag from a closed set) and `payload` (whose shape
//! depends on the tag). Clients send the command set, the hub answers the
//! origin with ack frames and fans `Receive*` frames out to peers.
//!
//! DESIGN
//! ======
//! Inbound decoding is two-phase so the error taxonomy stays precise:
//! malformed JSON or an unknown `event` is a decode error, a known event
//! with a bad payload is a validation error. Both are answered with an
//! `Error` frame; neither drops the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::element::{Element, ElementDraft};

// =============================================================================
// SENDER AND CURSOR
// =============================================================================

/// Identity tuple attached to every `Receive*` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorStatus {
    Online,
    Offline,
}

/// Transient cursor state. Forwarded to peers, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub position: Position,
    #[serde(default)]
    pub selected_element_id: Option<Uuid>,
    pub status: CursorStatus,
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateElementPayload {
    pub temporary_element_id: String,
    pub element: ElementDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateElementPayload {
    pub element_id: Uuid,
    pub element: ElementDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteElementPayload {
    pub element_id: Uuid,
}

/// Closed inbound command set of the editor protocol.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Ping,
    Broadcast,
    CreateElement(CreateElementPayload),
    UpdateElement(UpdateElementPayload),
    DeleteElement(DeleteElementPayload),
    JoinUserCursor,
    UpdateUserCursor(Cursor),
}

impl ClientEvent {
    /// Event tag as it appears on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Broadcast => "Broadcast",
            Self::CreateElement(_) => "CreateElement",
            Self::UpdateElement(_) => "UpdateElement",
            Self::DeleteElement(_) => "DeleteElement",
            Self::JoinUserCursor => "JoinUserCursor",
            Self::UpdateUserCursor(_) => "UpdateUserCursor",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Everything the server puts on the wire: acks to the origin and
/// `Receive*` fan-out to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    // Origin acks.
    Pong {},
    /// Maps the client's temporary element id to the committed element so
    /// the origin can bind its optimistic placeholder.
    ElementCreated(HashMap<String, Element>),
    ElementUpdated {
        element: Element,
    },
    ElementDeleted {
        deleted_element_id: Uuid,
    },
    /// Roster of the *other* live clients in the session.
    CurrentUsers(Vec<Sender>),
    Error {
        message: String,
    },

    // Peer fan-out.
    ReceiveElementCreated {
        element: Element,
        sender: Sender,
    },
    ReceiveElementUpdated {
        element: Element,
        sender: Sender,
    },
    ReceiveElementDeleted {
        deleted_element_id: Uuid,
        sender: Sender,
    },
    ReceiveUserCursorJoined {
        sender: Sender,
    },
    ReceiveUserCursorLeft {
        sender: Sender,
    },
    ReceiveUserCursorUpdated {
        cursor: Cursor,
        sender: Sender,
    },
    Broadcast {
        message: String,
    },
    Disconnect {
        sender: Sender,
    },
}

// =============================================================================
// DECODE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    Decode(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid {event} payload: {message}")]
    Validation { event: &'static str, message: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &'static str,
    value: Value,
) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|e| FrameError::Validation { event, message: e.to_string() })
}

/// Decode one inbound text frame into a command.
///
/// # Errors
///
/// `Decode` for malformed JSON, `UnknownEvent` for a tag outside the closed
/// set, `Validation` when the payload shape does not match the event.
pub fn decode_client_frame(text: &str) -> Result<ClientEvent, FrameError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| FrameError::Decode(e.to_string()))?;

    match envelope.event.as_str() {
        "Ping" => Ok(ClientEvent::Ping),
        "Broadcast" => Ok(ClientEvent::Broadcast),
        "JoinUserCursor" => Ok(ClientEvent::JoinUserCursor),
        "CreateElement" => Ok(ClientEvent::CreateElement(payload("CreateElement", envelope.payload)?)),
        "UpdateElement" => Ok(ClientEvent::UpdateElement(payload("UpdateElement", envelope.payload)?)),
        "DeleteElement" => Ok(ClientEvent::DeleteElement(payload("DeleteElement", envelope.payload)?)),
        "UpdateUserCursor" => Ok(ClientEvent::UpdateUserCursor(payload("UpdateUserCursor", envelope.payload)?)),
        other => Err(FrameError::UnknownEvent(other.to_string())),
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
